// 该文件是 Daowen （稻瘟） 项目的一部分。
// tests/pipeline.rs - 帧流水线集成测试
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

#![cfg(feature = "model_replay")]

use std::{sync::Arc, thread, time::Duration};

use daowen::{
  config::{BoxConvention, DetectorConfig},
  detector::Detector,
  frame::{RgbNhwcFrame, SourceFrame},
  geometry::FitPolicy,
  model::{RawPrediction, ReplayEngine},
  pipeline::{FrameOutput, FramePipelineBuilder, SubmitOutcome},
};

fn replay_detector() -> Arc<Detector<ReplayEngine>> {
  let config = DetectorConfig {
    input_size: 4,
    num_anchors: 1,
    box_convention: BoxConvention::Normalized,
    ..Default::default()
  };
  // 第二段录制没有超过阈值的目标
  let records = vec![
    RawPrediction::new([9, 1], vec![0.5, 0.5, 0.5, 0.5, 0.9, 0.8, 0.1, 0.05, 0.05]).unwrap(),
    RawPrediction::new([9, 1], vec![0.5, 0.5, 0.5, 0.5, 0.1, 0.8, 0.1, 0.05, 0.05]).unwrap(),
  ];
  Arc::new(Detector::new(ReplayEngine::new(records).unwrap(), &config).unwrap())
}

fn source_frame(index: u64) -> SourceFrame {
  SourceFrame {
    index,
    source_width: 1920,
    source_height: 1080,
    frame: RgbNhwcFrame::with_shape(4, 4),
  }
}

#[test]
fn replayed_frames_are_detected_and_mapped_in_order() {
  let detector = replay_detector();
  let (mut pipeline, outputs) = FramePipelineBuilder::new()
    .min_interval(Duration::ZERO)
    .surface((1080, 1080), FitPolicy::Fit)
    .build(detector.clone())
    .unwrap();

  for index in 0..4 {
    while pipeline.submit(source_frame(index)) != SubmitOutcome::Accepted {
      thread::sleep(Duration::from_millis(1));
    }
  }
  pipeline.shutdown();

  let results: Vec<FrameOutput> = outputs.iter().collect();
  let indices: Vec<u64> = results.iter().map(|o| o.frame_index).collect();
  assert_eq!(indices, vec![0, 1, 2, 3]);

  // 录制按顺序循环：有目标、无目标交替
  let counts: Vec<usize> = results.iter().map(|o| o.detections.len()).collect();
  assert_eq!(counts, vec![1, 0, 1, 0]);

  // 1920x1080 的帧在 1080x1080 的表面上：scale = 0.5625，上下各留 236.25 像素
  let mapped = results[0].mapped.as_ref().unwrap();
  let rect = mapped[0].rect;
  assert!((rect.left - 270.0).abs() < 1e-2);
  assert!((rect.top - 388.125).abs() < 1e-2);
  assert!((rect.right - 810.0).abs() < 1e-2);
  assert!((rect.bottom - 691.875).abs() < 1e-2);

  assert!(detector.is_closed());
}
