// 该文件是 Daowen （稻瘟） 项目的一部分。
// src/pipeline.rs - 实时帧流水线
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

//! 相机帧流水线。
//!
//! 生产者通过 [`FramePipeline::submit`] 投递帧，单个工作线程逐帧检测。
//! 投递使用零容量的同步通道：工作线程正忙时帧直接在投递处丢弃，不会排队。
//! 距上一次推理不足最小间隔的帧由工作线程丢弃。结果按投递顺序从通道送出。

use std::{
  sync::{
    Arc,
    atomic::{AtomicU8, AtomicU64, Ordering},
    mpsc::{self, Receiver, Sender, SyncSender, TrySendError},
  },
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
  detector::{DetectError, Detector},
  frame::SourceFrame,
  geometry::{DisplayGeometry, FitPolicy, MappedDetection, map_detections},
  model::{Detection, InferenceEngine},
};

pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(100);

/// 工作线程当前所处的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameState {
  Idle,
  Decoding,
  Suppressing,
  /// 结果已送出
  Mapped,
  /// 因节流被丢弃
  Discarded,
}

impl FrameState {
  fn from_u8(value: u8) -> Self {
    match value {
      1 => FrameState::Decoding,
      2 => FrameState::Suppressing,
      3 => FrameState::Mapped,
      4 => FrameState::Discarded,
      _ => FrameState::Idle,
    }
  }
}

/// 投递结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
  Accepted,
  /// 工作线程正忙，帧被丢弃
  Dropped,
  /// 流水线已关闭
  Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PipelineStats {
  pub submitted: u64,
  pub dropped: u64,
  pub throttled: u64,
  pub processed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameOutput {
  pub frame_index: u64,
  pub source_width: u32,
  pub source_height: u32,
  pub detections: Vec<Detection>,
  /// 仅在配置了显示表面时给出
  pub mapped: Option<Vec<MappedDetection>>,
  pub elapsed: Duration,
}

#[derive(Default)]
struct Shared {
  state: AtomicU8,
  submitted: AtomicU64,
  dropped: AtomicU64,
  throttled: AtomicU64,
  processed: AtomicU64,
}

impl Shared {
  fn set_state(&self, state: FrameState) {
    self.state.store(state as u8, Ordering::Release);
  }
}

#[derive(Debug, Clone, Copy)]
pub struct FramePipelineBuilder {
  min_interval: Duration,
  surface: Option<((u32, u32), FitPolicy)>,
}

impl Default for FramePipelineBuilder {
  fn default() -> Self {
    Self {
      min_interval: DEFAULT_MIN_INTERVAL,
      surface: None,
    }
  }
}

impl FramePipelineBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn min_interval(mut self, interval: Duration) -> Self {
    self.min_interval = interval;
    self
  }

  /// 在工作线程中直接把检测框映射到给定的显示表面
  pub fn surface(mut self, size: (u32, u32), policy: FitPolicy) -> Self {
    self.surface = Some((size, policy));
    self
  }

  pub fn build<E: InferenceEngine + 'static>(
    self,
    detector: Arc<Detector<E>>,
  ) -> std::io::Result<(FramePipeline<E>, Receiver<FrameOutput>)> {
    let (frame_tx, frame_rx) = mpsc::sync_channel::<SourceFrame>(0);
    let (output_tx, output_rx) = mpsc::channel();
    let shared = Arc::new(Shared::default());

    let worker = Worker {
      detector: detector.clone(),
      shared: shared.clone(),
      output: output_tx,
      min_interval: self.min_interval,
      surface: self.surface,
    };
    let handle = thread::Builder::new()
      .name("daowen-detect".into())
      .spawn(move || worker.run(frame_rx))?;

    info!("帧流水线启动，最小推理间隔 {:?}", self.min_interval);
    let pipeline = FramePipeline {
      detector,
      sender: Some(frame_tx),
      handle: Some(handle),
      shared,
    };
    Ok((pipeline, output_rx))
  }
}

pub struct FramePipeline<E: InferenceEngine + 'static> {
  detector: Arc<Detector<E>>,
  sender: Option<SyncSender<SourceFrame>>,
  handle: Option<JoinHandle<()>>,
  shared: Arc<Shared>,
}

impl<E: InferenceEngine + 'static> FramePipeline<E> {
  /// 投递一帧，从不阻塞
  pub fn submit(&self, frame: SourceFrame) -> SubmitOutcome {
    let Some(sender) = self.sender.as_ref() else {
      return SubmitOutcome::Closed;
    };

    self.shared.submitted.fetch_add(1, Ordering::Relaxed);
    match sender.try_send(frame) {
      Ok(()) => SubmitOutcome::Accepted,
      Err(TrySendError::Full(frame)) => {
        self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        debug!("工作线程忙，丢弃第 {} 帧", frame.index);
        SubmitOutcome::Dropped
      }
      Err(TrySendError::Disconnected(_)) => SubmitOutcome::Closed,
    }
  }

  pub fn state(&self) -> FrameState {
    FrameState::from_u8(self.shared.state.load(Ordering::Acquire))
  }

  pub fn stats(&self) -> PipelineStats {
    PipelineStats {
      submitted: self.shared.submitted.load(Ordering::Relaxed),
      dropped: self.shared.dropped.load(Ordering::Relaxed),
      throttled: self.shared.throttled.load(Ordering::Relaxed),
      processed: self.shared.processed.load(Ordering::Relaxed),
    }
  }

  pub fn detector(&self) -> &Arc<Detector<E>> {
    &self.detector
  }

  /// 停止接收新帧，等待工作线程退出后关闭检测器，可重复调用
  pub fn shutdown(&mut self) {
    if self.sender.take().is_none() && self.handle.is_none() {
      return;
    }

    if let Some(handle) = self.handle.take()
      && handle.join().is_err()
    {
      error!("检测工作线程异常退出");
    }
    self.detector.close();

    let stats = self.stats();
    info!(
      "帧流水线已关闭: 投递 {}, 丢弃 {}, 节流 {}, 完成 {}",
      stats.submitted, stats.dropped, stats.throttled, stats.processed
    );
  }
}

impl<E: InferenceEngine + 'static> Drop for FramePipeline<E> {
  fn drop(&mut self) {
    self.shutdown();
  }
}

struct Worker<E> {
  detector: Arc<Detector<E>>,
  shared: Arc<Shared>,
  output: Sender<FrameOutput>,
  min_interval: Duration,
  surface: Option<((u32, u32), FitPolicy)>,
}

impl<E: InferenceEngine> Worker<E> {
  fn run(self, frames: Receiver<SourceFrame>) {
    let mut last_inference: Option<Instant> = None;

    while let Ok(frame) = frames.recv() {
      if let Some(last) = last_inference
        && last.elapsed() < self.min_interval
      {
        self.shared.set_state(FrameState::Discarded);
        self.shared.throttled.fetch_add(1, Ordering::Relaxed);
        debug!("距上次推理不足 {:?}，丢弃第 {} 帧", self.min_interval, frame.index);
        self.shared.set_state(FrameState::Idle);
        continue;
      }

      let started = Instant::now();
      last_inference = Some(started);
      let detections = self.detect(&frame);
      let mapped = self.map(&frame, &detections);

      let output = FrameOutput {
        frame_index: frame.index,
        source_width: frame.source_width,
        source_height: frame.source_height,
        detections,
        mapped,
        elapsed: started.elapsed(),
      };
      debug!(
        "第 {} 帧检测完成，{} 个目标，耗时 {:.2?}",
        output.frame_index,
        output.detections.len(),
        output.elapsed
      );

      self.shared.set_state(FrameState::Mapped);
      self.shared.processed.fetch_add(1, Ordering::Relaxed);
      if self.output.send(output).is_err() {
        debug!("结果接收端已关闭");
      }
      self.shared.set_state(FrameState::Idle);
    }

    debug!("检测工作线程退出");
  }

  fn detect(&self, frame: &SourceFrame) -> Vec<Detection> {
    self.shared.set_state(FrameState::Decoding);
    let candidates = self.detector.infer(&frame.frame).and_then(|raw| {
      self
        .detector
        .decoder()
        .decode_default(&raw)
        .map_err(DetectError::from)
    });

    match candidates {
      Ok(candidates) => {
        self.shared.set_state(FrameState::Suppressing);
        self.detector.suppressor().suppress_default(candidates)
      }
      Err(DetectError::Closed) => {
        debug!("检测器已关闭，第 {} 帧无结果", frame.index);
        Vec::new()
      }
      Err(e) => {
        warn!("第 {} 帧检测失败: {}", frame.index, e);
        Vec::new()
      }
    }
  }

  fn map(&self, frame: &SourceFrame, detections: &[Detection]) -> Option<Vec<MappedDetection>> {
    let (surface, policy) = self.surface?;
    match DisplayGeometry::new((frame.source_width, frame.source_height), surface, policy) {
      Ok(geometry) => Some(map_detections(detections, &geometry)),
      Err(e) => {
        warn!("第 {} 帧无法映射: {}", frame.index, e);
        None
      }
    }
  }
}
