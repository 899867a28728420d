// 该文件是 Daowen （稻瘟） 项目的一部分。
// src/model.rs - 模型输出与检测结果
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

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::InputTensor;

pub const UNKNOWN_LABEL: &str = "Unknown";

/// 推理引擎：接收打包好的输入张量，返回原始预测张量
///
/// 引擎由 [`crate::detector::Detector`] 独占持有，关闭时直接析构。
pub trait InferenceEngine: Send {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 引擎能够在加载时确定的输出形状（不含批次维度），无法确定时返回 `None`
  fn output_dims(&self) -> Option<[usize; 2]>;

  fn infer(&mut self, input: &InputTensor) -> Result<RawPrediction, Self::Error>;
}

#[derive(Error, Debug)]
pub enum RawPredictionError {
  #[error("张量数据长度不匹配: 形状 {dims:?} 需要 {expected}, 实际 {actual}")]
  LengthMismatch {
    dims: [usize; 2],
    expected: usize,
    actual: usize,
  },
  #[error("张量形状过大: {0:?}")]
  Overflow([usize; 2]),
  #[error("不支持的批次大小: {0}")]
  Batch(usize),
  #[error("不支持的张量维度: {0:?}")]
  Rank(Vec<usize>),
}

/// 单次推理的原始输出，形状为二维（批次维度已去除）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawPrediction {
  dims: [usize; 2],
  data: Vec<f32>,
}

impl RawPrediction {
  pub fn new(dims: [usize; 2], data: Vec<f32>) -> Result<Self, RawPredictionError> {
    let expected = dims[0]
      .checked_mul(dims[1])
      .ok_or(RawPredictionError::Overflow(dims))?;
    if data.len() != expected {
      return Err(RawPredictionError::LengthMismatch {
        dims,
        expected,
        actual: data.len(),
      });
    }
    Ok(Self { dims, data })
  }

  /// 从带批次维度的形状构建，例如 `[1, 8, 8400]`
  pub fn from_shape(shape: &[usize], data: Vec<f32>) -> Result<Self, RawPredictionError> {
    match *shape {
      [rows, cols] => Self::new([rows, cols], data),
      [1, rows, cols] => Self::new([rows, cols], data),
      [batch, _, _] => Err(RawPredictionError::Batch(batch)),
      _ => Err(RawPredictionError::Rank(shape.to_vec())),
    }
  }

  pub fn dims(&self) -> [usize; 2] {
    self.dims
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }
}

/// 归一化坐标下的边界框 [left, top, right, bottom]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BBox {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl BBox {
  pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
    Self {
      left,
      top,
      right,
      bottom,
    }
  }

  /// 由中心点与宽高构建，并将各坐标截断到 [0, 1]
  pub fn from_center_clamped(cx: f32, cy: f32, w: f32, h: f32) -> Self {
    Self {
      left: (cx - w / 2.0).clamp(0.0, 1.0),
      top: (cy - h / 2.0).clamp(0.0, 1.0),
      right: (cx + w / 2.0).clamp(0.0, 1.0),
      bottom: (cy + h / 2.0).clamp(0.0, 1.0),
    }
  }

  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }

  pub fn area(&self) -> f32 {
    self.width() * self.height()
  }
}

/// 单个检测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  pub bbox: BBox,
  pub score: f32,
  pub class_index: usize,
  pub label: String,
  /// 产生该检测的锚点序号
  pub anchor: usize,
}

/// 类别名称表，进程内只加载一次
#[derive(Debug, Clone, PartialEq)]
pub struct LabelTable {
  labels: Arc<[String]>,
}

impl LabelTable {
  pub fn new<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Self {
    Self {
      labels: labels.into_iter().map(Into::<String>::into).collect(),
    }
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  /// 越界的类别序号返回 "Unknown"
  pub fn name(&self, class_index: usize) -> &str {
    self
      .labels
      .get(class_index)
      .map(String::as_str)
      .unwrap_or(UNKNOWN_LABEL)
  }
}

mod decoder;
pub use self::decoder::{DecodeError, TensorDecoder};

mod nms;
pub use self::nms::{SuppressionEngine, iou};

#[cfg(feature = "model_replay")]
mod replay;
#[cfg(feature = "model_replay")]
pub use self::replay::{ReplayEngine, ReplayEngineError};

#[cfg(feature = "model_onnx")]
mod onnx;
#[cfg(feature = "model_onnx")]
pub use self::onnx::{OnnxEngine, OnnxEngineBuilder, OnnxEngineError};

#[cfg(any(feature = "model_replay", feature = "model_onnx"))]
mod engine;
#[cfg(any(feature = "model_replay", feature = "model_onnx"))]
pub use self::engine::{EngineError, EngineWrapper};
