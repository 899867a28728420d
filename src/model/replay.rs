// 该文件是 Daowen （稻瘟） 项目的一部分。
// src/model/replay.rs - 回放录制的模型输出
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

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::InputTensor,
  model::{InferenceEngine, RawPrediction, RawPredictionError},
  url_to_path,
};

#[derive(Error, Debug)]
pub enum ReplayEngineError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("录制文件读取错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("录制文件解析错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("录制张量无效: {0}")]
  Tensor(#[from] RawPredictionError),
  #[error("录制文件中没有张量")]
  Empty,
  #[error("录制张量形状不一致: {first:?} 与 {other:?}")]
  InconsistentShapes { first: [usize; 2], other: [usize; 2] },
}

#[derive(Deserialize)]
struct TensorRecord {
  shape: Vec<usize>,
  data: Vec<f32>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReplayFile {
  Single(TensorRecord),
  Sequence(Vec<TensorRecord>),
}

/// 依次循环返回录制好的输出张量，忽略输入
///
/// 录制文件为 JSON，可以是单个 `{"shape": [...], "data": [...]}`，也可以是它们的数组。
#[derive(Debug)]
pub struct ReplayEngine {
  records: Vec<RawPrediction>,
  cursor: usize,
}

impl ReplayEngine {
  pub fn new(records: Vec<RawPrediction>) -> Result<Self, ReplayEngineError> {
    let first = records.first().ok_or(ReplayEngineError::Empty)?.dims();
    if let Some(other) = records.iter().map(RawPrediction::dims).find(|d| *d != first) {
      return Err(ReplayEngineError::InconsistentShapes { first, other });
    }
    Ok(Self { records, cursor: 0 })
  }

  pub fn from_json_str(text: &str) -> Result<Self, ReplayEngineError> {
    let records = match serde_json::from_str::<ReplayFile>(text)? {
      ReplayFile::Single(record) => vec![record],
      ReplayFile::Sequence(records) => records,
    };
    let records = records
      .into_iter()
      .map(|r| RawPrediction::from_shape(&r.shape, r.data))
      .collect::<Result<Vec<_>, _>>()?;
    Self::new(records)
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }
}

impl FromUrlWithScheme for ReplayEngine {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayEngine {
  type Error = ReplayEngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayEngineError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let path = url_to_path(url);
    info!("加载录制文件: {}", path.display());
    let text = std::fs::read_to_string(&path)?;
    let engine = Self::from_json_str(&text)?;
    debug!("录制张量数量: {}", engine.len());
    Ok(engine)
  }
}

impl InferenceEngine for ReplayEngine {
  type Error = std::convert::Infallible;

  fn output_dims(&self) -> Option<[usize; 2]> {
    self.records.first().map(RawPrediction::dims)
  }

  fn infer(&mut self, _input: &InputTensor) -> Result<RawPrediction, Self::Error> {
    let record = self.records[self.cursor].clone();
    self.cursor = (self.cursor + 1) % self.records.len();
    Ok(record)
  }
}
