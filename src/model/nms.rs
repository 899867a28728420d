// 该文件是 Daowen （稻瘟） 项目的一部分。
// src/model/nms.rs - 非极大值抑制
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

use tracing::debug;

use crate::{
  config::{DetectorConfig, NmsMode},
  model::{BBox, Detection},
};

/// 计算两个边界框的 IoU，并集面积不为正时返回 0
pub fn iou(a: &BBox, b: &BBox) -> f32 {
  let x1 = a.left.max(b.left);
  let y1 = a.top.max(b.top);
  let x2 = a.right.min(b.right);
  let y2 = a.bottom.min(b.bottom);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let union = a.area() + b.area() - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

/// 贪心非极大值抑制
#[derive(Debug, Clone, Copy)]
pub struct SuppressionEngine {
  iou_threshold: f32,
  mode: NmsMode,
}

impl SuppressionEngine {
  pub fn new(iou_threshold: f32, mode: NmsMode) -> Self {
    Self {
      iou_threshold,
      mode,
    }
  }

  pub fn from_config(config: &DetectorConfig) -> Self {
    Self::new(config.iou_threshold, config.nms_mode)
  }

  pub fn suppress_default(&self, detections: Vec<Detection>) -> Vec<Detection> {
    self.suppress(detections, self.iou_threshold)
  }

  /// 按得分降序保留检测框，移除与已保留框 IoU 超过阈值的其余框
  ///
  /// 排序是稳定的，得分相同时保持输入顺序，因此结果是确定的。
  pub fn suppress(&self, mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    if detections.is_empty() {
      return detections;
    }

    let total = detections.len();
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut suppressed = vec![false; total];

    for i in 0..total {
      if suppressed[i] {
        continue;
      }

      let best = &detections[i];
      for j in (i + 1)..total {
        if suppressed[j] {
          continue;
        }
        let other = &detections[j];
        if self.mode == NmsMode::PerClass && other.class_index != best.class_index {
          continue;
        }
        if iou(&best.bbox, &other.bbox) > iou_threshold {
          suppressed[j] = true;
        }
      }
    }

    let result: Vec<Detection> = detections
      .into_iter()
      .enumerate()
      .filter_map(|(i, det)| (!suppressed[i]).then_some(det))
      .collect();

    debug!(
      "NMS ({:?}): {} -> {} 个检测框",
      self.mode,
      total,
      result.len()
    );
    result
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn det(anchor: usize, class_index: usize, score: f32, bbox: [f32; 4]) -> Detection {
    Detection {
      bbox: BBox::new(bbox[0], bbox[1], bbox[2], bbox[3]),
      score,
      class_index,
      label: format!("class-{}", class_index),
      anchor,
    }
  }

  fn sample() -> Vec<Detection> {
    vec![
      det(0, 0, 0.60, [0.10, 0.10, 0.40, 0.40]),
      det(1, 1, 0.90, [0.12, 0.12, 0.42, 0.42]),
      det(2, 0, 0.75, [0.60, 0.60, 0.90, 0.90]),
      det(3, 2, 0.75, [0.61, 0.61, 0.91, 0.91]),
      det(4, 1, 0.50, [0.00, 0.70, 0.20, 0.95]),
      det(5, 3, 0.55, [0.30, 0.30, 0.65, 0.65]),
    ]
  }

  #[test]
  fn iou_of_identical_box_is_one() {
    let a = BBox::new(0.1, 0.2, 0.5, 0.7);
    assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
  }

  #[test]
  fn iou_is_symmetric() {
    let a = BBox::new(0.1, 0.1, 0.5, 0.5);
    let b = BBox::new(0.3, 0.2, 0.8, 0.6);
    assert_eq!(iou(&a, &b), iou(&b, &a));
    // 交集 0.2 * 0.3 = 0.06，并集 0.16 + 0.2 - 0.06 = 0.3
    assert!((iou(&a, &b) - 0.2).abs() < 1e-5);
  }

  #[test]
  fn iou_of_disjoint_boxes_is_zero() {
    let a = BBox::new(0.0, 0.0, 0.2, 0.2);
    let b = BBox::new(0.5, 0.5, 0.7, 0.7);
    assert_eq!(iou(&a, &b), 0.0);
    let touching = BBox::new(0.2, 0.0, 0.4, 0.2);
    assert_eq!(iou(&a, &touching), 0.0);
  }

  #[test]
  fn iou_of_degenerate_boxes_is_zero() {
    let point = BBox::new(0.5, 0.5, 0.5, 0.5);
    assert_eq!(iou(&point, &point), 0.0);
    let line = BBox::new(0.1, 0.5, 0.9, 0.5);
    assert_eq!(iou(&line, &BBox::new(0.0, 0.0, 1.0, 1.0)), 0.0);
  }

  #[test]
  fn duplicate_box_keeps_highest_score() {
    let engine = SuppressionEngine::new(0.45, NmsMode::ClassAgnostic);
    let bbox = [0.4, 0.4, 0.6, 0.6];
    let result = engine.suppress_default(vec![det(0, 0, 0.6, bbox), det(1, 0, 0.9, bbox)]);
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].score, 0.9);
    assert_eq!(result[0].anchor, 1);
  }

  #[test]
  fn class_agnostic_suppresses_across_classes() {
    let engine = SuppressionEngine::new(0.45, NmsMode::ClassAgnostic);
    let result = engine.suppress_default(sample());
    let anchors: Vec<usize> = result.iter().map(|d| d.anchor).collect();
    // 锚点 2 与 3 得分相同，按输入顺序保留锚点 2
    assert_eq!(anchors, vec![1, 2, 5, 4]);
  }

  #[test]
  fn per_class_only_suppresses_same_class() {
    let engine = SuppressionEngine::new(0.45, NmsMode::PerClass);
    let result = engine.suppress_default(sample());
    let anchors: Vec<usize> = result.iter().map(|d| d.anchor).collect();
    assert_eq!(anchors, vec![1, 2, 3, 0, 5, 4]);

    for (i, a) in result.iter().enumerate() {
      for b in &result[i + 1..] {
        if a.class_index == b.class_index {
          assert!(iou(&a.bbox, &b.bbox) <= 0.45);
        }
      }
    }
  }

  #[test]
  fn survivors_do_not_overlap_beyond_threshold() {
    let engine = SuppressionEngine::new(0.0, NmsMode::ClassAgnostic);
    for theta in [0.0, 0.1, 0.3, 0.45, 0.7, 1.0] {
      let result = engine.suppress(sample(), theta);
      for (i, a) in result.iter().enumerate() {
        for b in &result[i + 1..] {
          assert!(iou(&a.bbox, &b.bbox) <= theta);
        }
      }
    }
  }

  #[test]
  fn output_is_sorted_subset() {
    let engine = SuppressionEngine::new(0.45, NmsMode::ClassAgnostic);
    let input = sample();
    let result = engine.suppress_default(input.clone());
    assert!(result.len() <= input.len());
    assert!(result.iter().all(|d| input.contains(d)));
    assert!(result.windows(2).all(|w| w[0].score >= w[1].score));
  }

  #[test]
  fn suppression_is_idempotent() {
    for mode in [NmsMode::ClassAgnostic, NmsMode::PerClass] {
      let engine = SuppressionEngine::new(0.3, mode);
      let once = engine.suppress_default(sample());
      let twice = engine.suppress_default(once.clone());
      assert_eq!(once, twice);
    }
  }

  #[test]
  fn suppression_is_deterministic() {
    let engine = SuppressionEngine::new(0.45, NmsMode::ClassAgnostic);
    let first = engine.suppress_default(sample());
    for _ in 0..10 {
      assert_eq!(engine.suppress_default(sample()), first);
    }
  }

  #[test]
  fn empty_input_is_empty_output() {
    let engine = SuppressionEngine::new(0.45, NmsMode::ClassAgnostic);
    assert!(engine.suppress_default(Vec::new()).is_empty());
  }
}
