// 该文件是 Daowen （稻瘟） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理引擎
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

use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::Tensor,
};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::DetectorConfig,
  frame::{InputTensor, RgbNhwcFrame},
  model::{InferenceEngine, RawPrediction, RawPredictionError},
  url_to_path,
};

const DEFAULT_INTRA_THREADS: usize = 4;

#[derive(Error, Debug)]
pub enum OnnxEngineError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("ONNX Runtime 错误: {0}")]
  Runtime(#[from] ort::Error),
  #[error("模型输出无效: {0}")]
  Output(#[from] RawPredictionError),
  #[error("模型没有输出")]
  NoOutput,
  #[error("参数无效: {0}")]
  InvalidParameter(String),
}

pub struct OnnxEngineBuilder {
  model_path: PathBuf,
  intra_threads: usize,
}

impl FromUrlWithScheme for OnnxEngineBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxEngineBuilder {
  type Error = OnnxEngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxEngineError::SchemeMismatch(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let mut intra_threads = DEFAULT_INTRA_THREADS;
    for (k, v) in url.query_pairs() {
      if k == "threads" {
        intra_threads = v
          .parse()
          .map_err(|_| OnnxEngineError::InvalidParameter(format!("threads={}", v)))?;
      }
    }

    Ok(OnnxEngineBuilder {
      model_path: url_to_path(url),
      intra_threads,
    })
  }
}

impl OnnxEngineBuilder {
  pub fn intra_threads(mut self, threads: usize) -> Self {
    self.intra_threads = threads;
    self
  }

  /// 加载模型并用全零输入预热一次，以确定输出形状
  pub fn build(self, config: &DetectorConfig) -> Result<OnnxEngine, OnnxEngineError> {
    info!("加载模型文件: {}", self.model_path.display());
    let session = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .with_intra_threads(self.intra_threads)?
      .commit_from_file(&self.model_path)?;
    let output_name = session
      .outputs
      .first()
      .map(|output| output.name.clone())
      .ok_or(OnnxEngineError::NoOutput)?;
    info!("模型加载完成，输出节点: {}", output_name);

    let mut engine = OnnxEngine {
      session,
      output_name,
      output_dims: None,
    };

    let warmup = RgbNhwcFrame::with_shape(config.input_size, config.input_size)
      .to_input_tensor(config.input_size, config.channel_order, config.input_layout)
      .map_err(|e| OnnxEngineError::InvalidParameter(e.to_string()))?;
    let dims = engine.infer(&warmup)?.dims();
    debug!("模型输出形状: {:?}", dims);
    engine.output_dims = Some(dims);

    Ok(engine)
  }
}

pub struct OnnxEngine {
  session: Session,
  output_name: String,
  output_dims: Option<[usize; 2]>,
}

impl InferenceEngine for OnnxEngine {
  type Error = OnnxEngineError;

  fn output_dims(&self) -> Option<[usize; 2]> {
    self.output_dims
  }

  fn infer(&mut self, input: &InputTensor) -> Result<RawPrediction, Self::Error> {
    let tensor = Tensor::from_array((input.shape(), input.data().to_vec()))?;

    debug!("执行模型推理");
    let outputs = self.session.run(ort::inputs![tensor])?;
    let output = outputs
      .get(self.output_name.as_str())
      .ok_or(OnnxEngineError::NoOutput)?;

    let (shape, data) = output.try_extract_tensor::<f32>()?;
    let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
    Ok(RawPrediction::from_shape(&dims, data.to_vec())?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_model_path_and_threads() {
    let url = Url::parse("onnx:///models/leaf%20blast.onnx?threads=2").unwrap();
    let builder = OnnxEngineBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path, PathBuf::from("/models/leaf blast.onnx"));
    assert_eq!(builder.intra_threads, 2);
    assert_eq!(builder.intra_threads(8).intra_threads, 8);

    let url = Url::parse("onnx:///models/leaf.onnx").unwrap();
    let builder = OnnxEngineBuilder::from_url(&url).unwrap();
    assert_eq!(builder.intra_threads, DEFAULT_INTRA_THREADS);
  }

  #[test]
  fn rejects_bad_urls() {
    let url = Url::parse("replay:///models/leaf.onnx").unwrap();
    assert!(matches!(
      OnnxEngineBuilder::from_url(&url),
      Err(OnnxEngineError::SchemeMismatch(_))
    ));

    let url = Url::parse("onnx:///models/leaf.onnx?threads=many").unwrap();
    assert!(matches!(
      OnnxEngineBuilder::from_url(&url),
      Err(OnnxEngineError::InvalidParameter(_))
    ));
  }
}
