// 该文件是 Daowen （稻瘟） 项目的一部分。
// src/task.rs - 检测任务
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

use std::{
  collections::VecDeque,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{
  detector::Detector,
  frame::ToSourceFrame,
  model::{Detection, InferenceEngine},
  output::Render,
  pipeline::{DEFAULT_MIN_INTERVAL, FrameOutput, FramePipelineBuilder, SubmitOutcome},
};

pub trait Task<I, E, O>: Sized {
  type Error;
  fn run_task(self, input: I, detector: Detector<E>, output: O) -> Result<(), Self::Error>;
}

/// 取第一帧检测一次
pub struct OneShotTask;

impl<F, E, RE, I, O> Task<I, E, O> for OneShotTask
where
  F: ToSourceFrame,
  E: InferenceEngine,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  O: Render<F, [Detection], Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, detector: Detector<E>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let image = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    let frame = image.to_source_frame(0, detector.input_size())?;
    info!(
      "输入帧获取成功（{}x{}），开始推理...",
      frame.source_width, frame.source_height
    );

    let now = Instant::now();
    let detections = detector.detect(&frame.frame);
    let elapsed = now.elapsed();
    info!("推理完成，检测到 {} 个目标，耗时: {:.2?}", detections.len(), elapsed);
    for detection in &detections {
      info!(
        "  {} {:.2} [{:.3}, {:.3}, {:.3}, {:.3}]",
        detection.label,
        detection.score,
        detection.bbox.left,
        detection.bbox.top,
        detection.bbox.right,
        detection.bbox.bottom
      );
    }

    output.render_result(&image, &detections)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    detector.close();
    Ok(())
  }
}

/// 通过帧流水线持续检测，直到输入结束、达到帧数上限或收到停止信号
#[derive(Debug)]
pub struct StreamTask {
  frame_number: Option<u64>,
  min_interval: Duration,
  stop: Arc<AtomicBool>,
}

impl Default for StreamTask {
  fn default() -> Self {
    Self {
      frame_number: None,
      min_interval: DEFAULT_MIN_INTERVAL,
      stop: Arc::new(AtomicBool::new(false)),
    }
  }
}

impl StreamTask {
  pub fn with_frame_number(mut self, frame_number: Option<u64>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_min_interval(mut self, interval: Duration) -> Self {
    self.min_interval = interval;
    self
  }

  /// 置位后任务在下一帧前退出
  pub fn stop_flag(&self) -> Arc<AtomicBool> {
    self.stop.clone()
  }
}

/// 按帧序号把结果与等待中的原图配对后渲染，没有结果的帧（被节流）直接丢弃
fn render_ready<F, O, RE>(
  outputs: impl Iterator<Item = FrameOutput>,
  pending: &mut VecDeque<(u64, F)>,
  output: &O,
) -> Result<usize, RE>
where
  O: Render<F, [Detection], Error = RE>,
{
  let mut rendered = 0;
  for result in outputs {
    while pending
      .front()
      .is_some_and(|(index, _)| *index < result.frame_index)
    {
      pending.pop_front();
    }
    let Some((_, image)) = pending.pop_front() else {
      continue;
    };

    info!(
      "第 {} 帧: {} 个目标，耗时 {:.2?}",
      result.frame_index,
      result.detections.len(),
      result.elapsed
    );
    output.render_result(&image, &result.detections)?;
    rendered += 1;
  }
  Ok(rendered)
}

impl<F, E, RE, I, O> Task<I, E, O> for StreamTask
where
  F: ToSourceFrame,
  E: InferenceEngine + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  O: Render<F, [Detection], Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, detector: Detector<E>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let input_size = detector.input_size();
    let (mut pipeline, outputs) = FramePipelineBuilder::new()
      .min_interval(self.min_interval)
      .build(Arc::new(detector))?;

    let mut pending: VecDeque<(u64, F)> = VecDeque::new();
    let mut rendered = 0;
    for (index, image) in input.enumerate() {
      let index = index as u64;
      if self.stop.load(Ordering::SeqCst) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
      if self.frame_number.is_some_and(|n| index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", index);
        break;
      }

      let frame = match image.to_source_frame(index, input_size) {
        Ok(frame) => frame,
        Err(e) => {
          warn!("第 {} 帧无法转换: {}", index, e);
          continue;
        }
      };
      match pipeline.submit(frame) {
        SubmitOutcome::Accepted => pending.push_back((index, image)),
        SubmitOutcome::Dropped => debug!("第 {} 帧被丢弃", index),
        SubmitOutcome::Closed => {
          warn!("帧流水线已关闭，退出任务循环");
          break;
        }
      }

      rendered += render_ready(outputs.try_iter(), &mut pending, &output)?;
    }

    pipeline.shutdown();
    rendered += render_ready(outputs.iter(), &mut pending, &output)?;

    let stats = pipeline.stats();
    info!(
      "任务完成，渲染 {} 帧（投递 {}, 丢弃 {}, 节流 {}）",
      rendered, stats.submitted, stats.dropped, stats.throttled
    );
    Ok(())
  }
}
