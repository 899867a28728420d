// 该文件是 Daowen （稻瘟） 项目的一部分。
// src/model/engine.rs - 按 URI 方案选择推理引擎
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

use thiserror::Error;
use url::Url;

use crate::{
  config::DetectorConfig,
  frame::InputTensor,
  model::{InferenceEngine, RawPrediction},
};

#[cfg(feature = "model_onnx")]
use crate::model::{OnnxEngine, OnnxEngineBuilder, OnnxEngineError};
#[cfg(feature = "model_replay")]
use crate::model::{ReplayEngine, ReplayEngineError};

#[derive(Error, Debug)]
pub enum EngineError {
  #[cfg(feature = "model_replay")]
  #[error("回放引擎错误: {0}")]
  ReplayEngineError(#[from] ReplayEngineError),
  #[cfg(feature = "model_onnx")]
  #[error("ONNX 引擎错误: {0}")]
  OnnxEngineError(#[from] OnnxEngineError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum EngineWrapper {
  #[cfg(feature = "model_replay")]
  Replay(ReplayEngine),
  #[cfg(feature = "model_onnx")]
  Onnx(Box<OnnxEngine>),
}

impl EngineWrapper {
  /// 根据模型地址加载引擎，部分引擎需要检测器配置来准备预热输入
  #[allow(unused_variables)]
  pub fn open(url: &Url, config: &DetectorConfig) -> Result<Self, EngineError> {
    #[cfg(feature = "model_replay")]
    {
      use crate::{FromUrl, FromUrlWithScheme};

      if url.scheme() == ReplayEngine::SCHEME {
        return Ok(EngineWrapper::Replay(ReplayEngine::from_url(url)?));
      }
    }
    #[cfg(feature = "model_onnx")]
    {
      use crate::{FromUrl, FromUrlWithScheme};

      if url.scheme() == OnnxEngineBuilder::SCHEME {
        let engine = OnnxEngineBuilder::from_url(url)?.build(config)?;
        return Ok(EngineWrapper::Onnx(Box::new(engine)));
      }
    }
    Err(EngineError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl InferenceEngine for EngineWrapper {
  type Error = EngineError;

  fn output_dims(&self) -> Option<[usize; 2]> {
    match self {
      #[cfg(feature = "model_replay")]
      EngineWrapper::Replay(engine) => engine.output_dims(),
      #[cfg(feature = "model_onnx")]
      EngineWrapper::Onnx(engine) => engine.output_dims(),
    }
  }

  fn infer(&mut self, input: &InputTensor) -> Result<RawPrediction, Self::Error> {
    match self {
      #[cfg(feature = "model_replay")]
      EngineWrapper::Replay(engine) => engine.infer(input).map_err(|e| match e {}),
      #[cfg(feature = "model_onnx")]
      EngineWrapper::Onnx(engine) => Ok(engine.infer(input)?),
    }
  }
}
