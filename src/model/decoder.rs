// 该文件是 Daowen （稻瘟） 项目的一部分。
// src/model/decoder.rs - 输出张量解码
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
use tracing::debug;

use crate::{
  config::{BoxConvention, ConfigError, DetectorConfig, ScoreConvention, TensorLayout},
  model::{BBox, Detection, LabelTable, RawPrediction},
};

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("输出张量形状不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  ShapeMismatch {
    expected: [usize; 2],
    actual: [usize; 2],
  },
}

/// 将每个锚点的预测解码为候选检测框
///
/// 张量的形状、布局、框坐标约定与得分约定都在构建时确定，
/// 解码本身是输入的纯函数，不持有跨帧状态。
#[derive(Debug, Clone)]
pub struct TensorDecoder {
  labels: LabelTable,
  confidence_threshold: f32,
  input_size: f32,
  num_anchors: usize,
  num_classes: usize,
  num_features: usize,
  expected_dims: [usize; 2],
  box_convention: BoxConvention,
  score_convention: ScoreConvention,
  layout: TensorLayout,
}

impl TensorDecoder {
  pub fn new(config: &DetectorConfig) -> Result<Self, ConfigError> {
    config.validate()?;
    debug!(
      "创建解码器: 锚点 {}, 类别 {}, 布局 {:?}, 框约定 {:?}, 得分约定 {:?}",
      config.num_anchors,
      config.num_classes(),
      config.tensor_layout,
      config.box_convention,
      config.score_convention
    );
    Ok(Self {
      labels: LabelTable::new(config.class_labels.iter().cloned()),
      confidence_threshold: config.confidence_threshold,
      input_size: config.input_size as f32,
      num_anchors: config.num_anchors,
      num_classes: config.num_classes(),
      num_features: config.num_features(),
      expected_dims: config.expected_dims(),
      box_convention: config.box_convention,
      score_convention: config.score_convention,
      layout: config.tensor_layout,
    })
  }

  pub fn decode_default(&self, raw: &RawPrediction) -> Result<Vec<Detection>, DecodeError> {
    self.decode(raw, self.confidence_threshold)
  }

  pub fn decode(
    &self,
    raw: &RawPrediction,
    confidence_threshold: f32,
  ) -> Result<Vec<Detection>, DecodeError> {
    if raw.dims() != self.expected_dims {
      return Err(DecodeError::ShapeMismatch {
        expected: self.expected_dims,
        actual: raw.dims(),
      });
    }

    let data = raw.data();
    let anchors = self.num_anchors;
    let features = self.num_features;
    let layout = self.layout;
    let at = |anchor: usize, feature: usize| match layout {
      TensorLayout::FeatureMajor => data[feature * anchors + anchor],
      TensorLayout::AnchorMajor => data[anchor * features + feature],
    };

    // 类别分数排在框参数（以及目标置信度）之后
    let class_offset = self.num_features - self.num_classes;
    let scale = match self.box_convention {
      BoxConvention::PixelSpace => self.input_size,
      BoxConvention::Normalized => 1.0,
    };

    let mut items = Vec::new();
    for anchor in 0..anchors {
      let (best_score, class_index) = {
        let mut best_score = f32::NEG_INFINITY;
        let mut best_class = 0usize;
        for c in 0..self.num_classes {
          let s = at(anchor, class_offset + c);
          if s > best_score {
            best_score = s;
            best_class = c;
          }
        }
        (best_score, best_class)
      };

      let score = match self.score_convention {
        ScoreConvention::ObjectnessGated => at(anchor, 4) * best_score,
        ScoreConvention::ClassOnly => best_score,
      };

      if !score.is_finite() || score < confidence_threshold {
        continue;
      }

      let cx = at(anchor, 0) / scale;
      let cy = at(anchor, 1) / scale;
      let w = at(anchor, 2) / scale;
      let h = at(anchor, 3) / scale;
      if !(cx.is_finite() && cy.is_finite() && w.is_finite() && h.is_finite()) {
        continue;
      }

      items.push(Detection {
        bbox: BBox::from_center_clamped(cx, cy, w, h),
        score,
        class_index,
        label: self.labels.name(class_index).to_string(),
        anchor,
      });
    }

    debug!("解码得到 {} 个候选框", items.len());
    Ok(items)
  }
}
