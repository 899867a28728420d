// 该文件是 Daowen （稻瘟） 项目的一部分。
// src/config.rs - 检测器配置
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

use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
pub const DEFAULT_INPUT_SIZE: u32 = 640;
pub const DEFAULT_NUM_ANCHORS: usize = 8400;

/// 稻叶病害类别
pub const DEFAULT_LABELS: [&str; 4] = [
  "Blast",
  "Hama Putih Palsu",
  "Hawar Daun Bakteri",
  "Stem Borer",
];

/// 边界框参数的坐标约定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BoxConvention {
  /// 以模型输入尺寸为单位的像素坐标，需要除以 `input_size`
  #[default]
  PixelSpace,
  /// 已经归一化到 [0, 1]
  Normalized,
}

/// 锚点综合得分的计算方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ScoreConvention {
  /// 第 5 个特征为目标置信度，得分 = 目标置信度 × 最大类别分数
  #[default]
  ObjectnessGated,
  /// 没有目标置信度，得分 = 最大类别分数
  ClassOnly,
}

/// 输出张量的内存布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TensorLayout {
  /// [F, A]，每一行是一个特征
  #[default]
  FeatureMajor,
  /// [A, F]，每一行是一个锚点
  AnchorMajor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum NmsMode {
  /// 高分检测框抑制任意类别的重叠框
  #[default]
  ClassAgnostic,
  /// 只抑制同类别的重叠框
  PerClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ChannelOrder {
  Rgb,
  #[default]
  Bgr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum InputLayout {
  #[default]
  Nhwc,
  Nchw,
}

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("配置文件读取错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("配置文件解析错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("{name} 超出范围 [0, 1]: {value}")]
  ThresholdOutOfRange { name: &'static str, value: f32 },
  #[error("模型输入尺寸不能为 0")]
  ZeroInputSize,
  #[error("锚点数量不能为 0")]
  ZeroAnchors,
  #[error("类别标签不能为空")]
  EmptyLabels,
  #[error("模型输出形状不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  ShapeMismatch {
    expected: [usize; 2],
    actual: [usize; 2],
  },
}

/// 检测器配置，对应外部模型的输出约定
///
/// 默认得分约定带目标置信度，期望输出 `[9, 8400]`。
/// 输出为 `[1, 8, 8400]` 的四类别稻瘟模型没有目标置信度，需要设置 `ScoreConvention::ClassOnly`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
  pub confidence_threshold: f32,
  pub iou_threshold: f32,
  pub input_size: u32,
  pub class_labels: Vec<String>,
  pub box_convention: BoxConvention,
  pub score_convention: ScoreConvention,
  pub num_anchors: usize,
  pub tensor_layout: TensorLayout,
  pub nms_mode: NmsMode,
  pub channel_order: ChannelOrder,
  pub input_layout: InputLayout,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      input_size: DEFAULT_INPUT_SIZE,
      class_labels: DEFAULT_LABELS.iter().map(|s| s.to_string()).collect(),
      box_convention: BoxConvention::default(),
      score_convention: ScoreConvention::default(),
      num_anchors: DEFAULT_NUM_ANCHORS,
      tensor_layout: TensorLayout::default(),
      nms_mode: NmsMode::default(),
      channel_order: ChannelOrder::default(),
      input_layout: InputLayout::default(),
    }
  }
}

impl DetectorConfig {
  pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
    let config: DetectorConfig = serde_json::from_str(text)?;
    config.validate()?;
    Ok(config)
  }

  pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
    debug!("读取检测器配置: {}", path.as_ref().display());
    let text = std::fs::read_to_string(path)?;
    Self::from_json_str(&text)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    for (name, value) in [
      ("confidence_threshold", self.confidence_threshold),
      ("iou_threshold", self.iou_threshold),
    ] {
      if !(0.0..=1.0).contains(&value) {
        error!("{} 超出范围: {}", name, value);
        return Err(ConfigError::ThresholdOutOfRange { name, value });
      }
    }
    if self.input_size == 0 {
      return Err(ConfigError::ZeroInputSize);
    }
    if self.num_anchors == 0 {
      return Err(ConfigError::ZeroAnchors);
    }
    if self.class_labels.is_empty() {
      return Err(ConfigError::EmptyLabels);
    }
    Ok(())
  }

  pub fn num_classes(&self) -> usize {
    self.class_labels.len()
  }

  /// 每个锚点的特征数：4 个框参数，可选的目标置信度，以及各类别分数
  pub fn num_features(&self) -> usize {
    let objectness = match self.score_convention {
      ScoreConvention::ObjectnessGated => 1,
      ScoreConvention::ClassOnly => 0,
    };
    4 + objectness + self.num_classes()
  }

  /// 按 `tensor_layout` 排列的期望输出形状（不含批次维度）
  pub fn expected_dims(&self) -> [usize; 2] {
    match self.tensor_layout {
      TensorLayout::FeatureMajor => [self.num_features(), self.num_anchors],
      TensorLayout::AnchorMajor => [self.num_anchors, self.num_features()],
    }
  }

  /// 检查推理引擎报告的输出形状，只在构建检测器时调用一次
  pub fn check_output_dims(&self, actual: [usize; 2]) -> Result<(), ConfigError> {
    let expected = self.expected_dims();
    if expected != actual {
      error!("模型输出形状不匹配: 期望 {:?}, 实际 {:?}", expected, actual);
      return Err(ConfigError::ShapeMismatch { expected, actual });
    }
    Ok(())
  }
}
