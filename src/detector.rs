// 该文件是 Daowen （稻瘟） 项目的一部分。
// src/detector.rs - 同步检测器
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

use std::sync::{Mutex, MutexGuard};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  config::{ChannelOrder, ConfigError, DetectorConfig, InputLayout},
  frame::{FrameError, RgbNhwcFrame},
  model::{
    DecodeError, Detection, InferenceEngine, RawPrediction, SuppressionEngine, TensorDecoder,
  },
};

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("检测器已关闭")]
  Closed,
  #[error("输入帧无效: {0}")]
  Frame(#[from] FrameError),
  #[error("推理失败: {0}")]
  Engine(Box<dyn std::error::Error + Send + Sync>),
  #[error("输出解码失败: {0}")]
  Decode(#[from] DecodeError),
}

/// 检测器：持有推理引擎，串联输入打包、推理、解码与 NMS
///
/// 引擎与关闭状态放在同一把锁里（`None` 表示已关闭），因此关闭操作会等待
/// 正在进行的推理结束，关闭后的所有检测都返回空列表。
pub struct Detector<E> {
  engine: Mutex<Option<E>>,
  decoder: TensorDecoder,
  suppressor: SuppressionEngine,
  input_size: u32,
  channel_order: ChannelOrder,
  input_layout: InputLayout,
}

impl<E: InferenceEngine> Detector<E> {
  /// 构建检测器，配置错误只在这里报告一次
  pub fn new(engine: E, config: &DetectorConfig) -> Result<Self, ConfigError> {
    let decoder = TensorDecoder::new(config)?;
    match engine.output_dims() {
      Some(dims) => config.check_output_dims(dims)?,
      None => warn!("推理引擎无法报告输出形状，将在每帧解码时检查"),
    }

    info!(
      "检测器就绪: 输入 {0}x{0}, 置信度阈值 {1}, NMS 阈值 {2}, 类别 {3}",
      config.input_size,
      config.confidence_threshold,
      config.iou_threshold,
      config.num_classes()
    );

    Ok(Self {
      engine: Mutex::new(Some(engine)),
      decoder,
      suppressor: SuppressionEngine::from_config(config),
      input_size: config.input_size,
      channel_order: config.channel_order,
      input_layout: config.input_layout,
    })
  }

  pub fn decoder(&self) -> &TensorDecoder {
    &self.decoder
  }

  pub fn suppressor(&self) -> &SuppressionEngine {
    &self.suppressor
  }

  pub fn input_size(&self) -> u32 {
    self.input_size
  }

  fn lock_engine(&self) -> MutexGuard<'_, Option<E>> {
    match self.engine.lock() {
      Ok(guard) => guard,
      Err(poisoned) => {
        // 推理过程中发生 panic，引擎状态不可信，直接释放
        error!("推理引擎锁中毒，关闭检测器");
        let mut guard = poisoned.into_inner();
        guard.take();
        self.engine.clear_poison();
        guard
      }
    }
  }

  /// 检测一帧，任何单帧错误都只记录日志并返回空列表
  pub fn detect(&self, frame: &RgbNhwcFrame) -> Vec<Detection> {
    match self.try_detect(frame) {
      Ok(detections) => detections,
      Err(DetectError::Closed) => {
        debug!("检测器已关闭，跳过该帧");
        Vec::new()
      }
      Err(e) => {
        warn!("本帧检测失败: {}", e);
        Vec::new()
      }
    }
  }

  pub fn try_detect(&self, frame: &RgbNhwcFrame) -> Result<Vec<Detection>, DetectError> {
    let raw = self.infer(frame)?;
    let candidates = self.decoder.decode_default(&raw)?;
    let detections = self.suppressor.suppress_default(candidates);
    debug!("检测到 {} 个目标", detections.len());
    Ok(detections)
  }

  /// 打包输入并执行推理，只有这一步持有引擎锁
  pub fn infer(&self, frame: &RgbNhwcFrame) -> Result<RawPrediction, DetectError> {
    let input = frame.to_input_tensor(self.input_size, self.channel_order, self.input_layout)?;
    let mut guard = self.lock_engine();
    let engine = guard.as_mut().ok_or(DetectError::Closed)?;
    engine
      .infer(&input)
      .map_err(|e| DetectError::Engine(Box::new(e)))
  }

  /// 释放推理引擎，可重复调用
  pub fn close(&self) {
    let mut guard = self.lock_engine();
    if let Some(engine) = guard.take() {
      drop(engine);
      info!("检测器已关闭");
    }
  }

  pub fn is_closed(&self) -> bool {
    self.lock_engine().is_none()
  }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::{
      Arc,
      atomic::{AtomicBool, AtomicUsize, Ordering},
      mpsc,
    },
    thread,
    time::Duration,
  };

  use super::*;
  use crate::{
    config::{BoxConvention, TensorLayout},
    frame::InputTensor,
  };

  #[derive(Error, Debug)]
  #[error("模拟推理失败")]
  struct MockError;

  /// 返回固定张量的模拟引擎
  struct MockEngine {
    output: RawPrediction,
    calls: Arc<AtomicUsize>,
    fail: bool,
  }

  impl InferenceEngine for MockEngine {
    type Error = MockError;

    fn output_dims(&self) -> Option<[usize; 2]> {
      Some(self.output.dims())
    }

    fn infer(&mut self, _input: &InputTensor) -> Result<RawPrediction, Self::Error> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if self.fail {
        return Err(MockError);
      }
      Ok(self.output.clone())
    }
  }

  fn config() -> DetectorConfig {
    DetectorConfig {
      input_size: 4,
      num_anchors: 2,
      box_convention: BoxConvention::Normalized,
      tensor_layout: TensorLayout::AnchorMajor,
      ..Default::default()
    }
  }

  fn duplicate_anchors() -> RawPrediction {
    RawPrediction::new(
      [2, 9],
      vec![
        0.5, 0.5, 0.2, 0.2, 1.0, 0.9, 0.0, 0.0, 0.0, //
        0.5, 0.5, 0.2, 0.2, 1.0, 0.0, 0.6, 0.0, 0.0,
      ],
    )
    .unwrap()
  }

  fn mock(fail: bool) -> (MockEngine, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let engine = MockEngine {
      output: duplicate_anchors(),
      calls: calls.clone(),
      fail,
    };
    (engine, calls)
  }

  #[test]
  fn detect_decodes_and_suppresses() {
    let (engine, calls) = mock(false);
    let detector = Detector::new(engine, &config()).unwrap();
    let detections = detector.detect(&RgbNhwcFrame::with_shape(4, 4));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].class_index, 0);
    assert!((detections[0].score - 0.9).abs() < 1e-6);
  }

  #[test]
  fn mismatched_engine_shape_fails_construction() {
    let (engine, _) = mock(false);
    let cfg = DetectorConfig {
      num_anchors: 3,
      ..config()
    };
    assert!(matches!(
      Detector::new(engine, &cfg),
      Err(ConfigError::ShapeMismatch { .. })
    ));
  }

  #[test]
  fn close_is_idempotent_and_detect_returns_empty() {
    let (engine, calls) = mock(false);
    let detector = Detector::new(engine, &config()).unwrap();
    assert!(!detector.is_closed());
    detector.close();
    detector.close();
    assert!(detector.is_closed());

    let frame = RgbNhwcFrame::with_shape(4, 4);
    assert!(detector.detect(&frame).is_empty());
    assert!(matches!(detector.try_detect(&frame), Err(DetectError::Closed)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn engine_failure_is_local_to_the_frame() {
    let (engine, calls) = mock(true);
    let detector = Detector::new(engine, &config()).unwrap();
    let frame = RgbNhwcFrame::with_shape(4, 4);
    assert!(detector.detect(&frame).is_empty());
    assert!(matches!(detector.try_detect(&frame), Err(DetectError::Engine(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(!detector.is_closed());
  }

  #[test]
  fn malformed_frame_is_skipped() {
    let (engine, calls) = mock(false);
    let detector = Detector::new(engine, &config()).unwrap();
    assert!(detector.detect(&RgbNhwcFrame::with_shape(5, 4)).is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(detector.detect(&RgbNhwcFrame::with_shape(4, 4)).len(), 1);
  }

  /// 推理时阻塞，直到测试放行
  struct GatedEngine {
    output: RawPrediction,
    started: mpsc::Sender<()>,
    release: mpsc::Receiver<()>,
    dropped: Arc<AtomicBool>,
  }

  impl Drop for GatedEngine {
    fn drop(&mut self) {
      self.dropped.store(true, Ordering::SeqCst);
    }
  }

  impl InferenceEngine for GatedEngine {
    type Error = MockError;

    fn output_dims(&self) -> Option<[usize; 2]> {
      Some(self.output.dims())
    }

    fn infer(&mut self, _input: &InputTensor) -> Result<RawPrediction, Self::Error> {
      let _ = self.started.send(());
      self.release.recv().map_err(|_| MockError)?;
      Ok(self.output.clone())
    }
  }

  #[test]
  fn close_waits_for_in_flight_inference() {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let dropped = Arc::new(AtomicBool::new(false));
    let engine = GatedEngine {
      output: duplicate_anchors(),
      started: started_tx,
      release: release_rx,
      dropped: dropped.clone(),
    };
    let detector = Arc::new(Detector::new(engine, &config()).unwrap());

    let worker = {
      let detector = detector.clone();
      thread::spawn(move || detector.detect(&RgbNhwcFrame::with_shape(4, 4)))
    };
    started_rx.recv().unwrap();

    let closed = Arc::new(AtomicBool::new(false));
    let closer = {
      let detector = detector.clone();
      let closed = closed.clone();
      thread::spawn(move || {
        detector.close();
        closed.store(true, Ordering::SeqCst);
      })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!closed.load(Ordering::SeqCst));
    assert!(!dropped.load(Ordering::SeqCst));

    release_tx.send(()).unwrap();
    let detections = worker.join().unwrap();
    closer.join().unwrap();

    assert_eq!(detections.len(), 1);
    assert!(closed.load(Ordering::SeqCst));
    assert!(dropped.load(Ordering::SeqCst));
    assert!(detector.detect(&RgbNhwcFrame::with_shape(4, 4)).is_empty());
  }
}
