// 该文件是 Daowen （稻瘟） 项目的一部分。
// src/bin/detect_stream.rs - 连续帧检测
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{sync::atomic::Ordering, thread, time::Duration};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use daowen::{
  FromUrl,
  args::DetectorArgs,
  detector::Detector,
  input::InputWrapper,
  model::EngineWrapper,
  output::OutputWrapper,
  task::{StreamTask, Task},
};

/// Daowen 连续帧检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub detector: DetectorArgs,
  /// 输入来源，例如 folder:///data/frames?fps=30&loop
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径，例如 folder:///data/records
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 最多读取的帧数
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<u64>,
  /// 两次推理之间的最小间隔（毫秒）
  #[arg(long, value_name = "MILLIS", default_value_t = 100)]
  pub min_interval_ms: u64,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.detector.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let config = args.detector.to_config()?;
  let input = InputWrapper::from_url(&args.input)?;
  let engine = EngineWrapper::open(&args.detector.model, &config)?;
  let detector = Detector::new(engine, &config)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let task = StreamTask::default()
    .with_frame_number(args.frame_number)
    .with_min_interval(Duration::from_millis(args.min_interval_ms));

  let stop = task.stop_flag();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    stop.store(true, Ordering::SeqCst);
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  task.run_task(input, detector, output)?;

  Ok(())
}
