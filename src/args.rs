// 该文件是 Daowen （稻瘟） 项目的一部分。
// src/args.rs - 检测器命令行参数
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

use std::path::PathBuf;

use clap::Args;
use tracing::info;
use url::Url;

use crate::config::{
  BoxConvention, ChannelOrder, ConfigError, DetectorConfig, InputLayout, NmsMode, ScoreConvention,
  TensorLayout,
};

/// 检测器参数，命令行中给出的值覆盖配置文件
#[derive(Args, Debug, Clone)]
pub struct DetectorArgs {
  /// 模型地址，例如 replay:///data/outputs.json 或 onnx:///models/leaf.onnx
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 检测器配置文件（JSON）
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence: Option<f32>,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub nms_threshold: Option<f32>,

  /// 模型输入边长
  #[arg(long, value_name = "PIXELS")]
  pub input_size: Option<u32>,

  /// 类别标签，逗号分隔，顺序与模型输出一致
  #[arg(long, value_name = "LABELS", value_delimiter = ',')]
  pub labels: Option<Vec<String>>,

  /// 锚点数量
  #[arg(long, value_name = "COUNT")]
  pub num_anchors: Option<usize>,

  #[arg(long, value_enum)]
  pub box_convention: Option<BoxConvention>,

  /// 得分约定，输出 [1, 8, 8400] 的模型使用 class-only
  #[arg(long, value_enum)]
  pub score_convention: Option<ScoreConvention>,

  #[arg(long, value_enum)]
  pub tensor_layout: Option<TensorLayout>,

  #[arg(long, value_enum)]
  pub nms_mode: Option<NmsMode>,

  #[arg(long, value_enum)]
  pub channel_order: Option<ChannelOrder>,

  #[arg(long, value_enum)]
  pub input_layout: Option<InputLayout>,
}

impl DetectorArgs {
  /// 合并配置文件与命令行参数，并校验结果
  pub fn to_config(&self) -> Result<DetectorConfig, ConfigError> {
    let mut config = match &self.config {
      Some(path) => DetectorConfig::from_json_file(path)?,
      None => DetectorConfig::default(),
    };

    if let Some(v) = self.confidence {
      config.confidence_threshold = v;
    }
    if let Some(v) = self.nms_threshold {
      config.iou_threshold = v;
    }
    if let Some(v) = self.input_size {
      config.input_size = v;
    }
    if let Some(v) = &self.labels {
      config.class_labels = v.clone();
    }
    if let Some(v) = self.num_anchors {
      config.num_anchors = v;
    }
    if let Some(v) = self.box_convention {
      config.box_convention = v;
    }
    if let Some(v) = self.score_convention {
      config.score_convention = v;
    }
    if let Some(v) = self.tensor_layout {
      config.tensor_layout = v;
    }
    if let Some(v) = self.nms_mode {
      config.nms_mode = v;
    }
    if let Some(v) = self.channel_order {
      config.channel_order = v;
    }
    if let Some(v) = self.input_layout {
      config.input_layout = v;
    }

    config.validate()?;
    info!("检测器配置: {:?}", config);
    Ok(config)
  }
}
