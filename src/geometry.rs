// 该文件是 Daowen （稻瘟） 项目的一部分。
// src/geometry.rs - 检测框到显示表面的坐标映射
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

//! 归一化检测框到像素坐标的映射。
//!
//! 映射只负责重新定位坐标，不会缩放或裁剪图像。`Fit` 与 `Fill` 的选择必须与
//! 实际显示图像时采用的策略一致，否则绘制出的检测框会错位；这一点无法在运行时
//! 检测，只能由调用方保证。

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{BBox, Detection};

/// 显示策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FitPolicy {
  /// 保持宽高比完整显示源图像，两侧或上下留黑边
  #[default]
  Fit,
  /// 源图像已在上游裁剪到与表面相同的宽高比，直接按表面尺寸缩放
  Fill,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GeometryError {
  #[error("尺寸不能为 0: 源图像 {source_width}x{source_height}, 显示表面 {surface_width}x{surface_height}")]
  ZeroDimension {
    source_width: u32,
    source_height: u32,
    surface_width: u32,
    surface_height: u32,
  },
}

/// 单次渲染使用的几何信息，不做持久化
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayGeometry {
  source_width: u32,
  source_height: u32,
  surface_width: u32,
  surface_height: u32,
  fit_policy: FitPolicy,
}

/// 显示表面上的像素矩形
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PixelRect {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl PixelRect {
  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }
}

impl DisplayGeometry {
  pub fn new(
    (source_width, source_height): (u32, u32),
    (surface_width, surface_height): (u32, u32),
    fit_policy: FitPolicy,
  ) -> Result<Self, GeometryError> {
    if source_width == 0 || source_height == 0 || surface_width == 0 || surface_height == 0 {
      return Err(GeometryError::ZeroDimension {
        source_width,
        source_height,
        surface_width,
        surface_height,
      });
    }

    Ok(Self {
      source_width,
      source_height,
      surface_width,
      surface_height,
      fit_policy,
    })
  }

  pub fn surface_size(&self) -> (u32, u32) {
    (self.surface_width, self.surface_height)
  }

  pub fn fit_policy(&self) -> FitPolicy {
    self.fit_policy
  }

  /// 返回 (scale, offset_x, offset_y)，仅用于 `Fit`
  fn letterbox(&self) -> (f32, f32, f32) {
    let (src_w, src_h) = (self.source_width as f32, self.source_height as f32);
    let (surf_w, surf_h) = (self.surface_width as f32, self.surface_height as f32);
    let scale = (surf_w / src_w).min(surf_h / src_h);
    let offset_x = (surf_w - src_w * scale) / 2.0;
    let offset_y = (surf_h - src_h * scale) / 2.0;
    (scale, offset_x, offset_y)
  }

  /// 源图像在显示表面上占据的区域
  pub fn content_rect(&self) -> PixelRect {
    map_to_surface(&BBox::new(0.0, 0.0, 1.0, 1.0), self)
  }
}

/// 将归一化检测框映射到显示表面的像素坐标
pub fn map_to_surface(bbox: &BBox, geometry: &DisplayGeometry) -> PixelRect {
  match geometry.fit_policy {
    FitPolicy::Fit => {
      let (scale, offset_x, offset_y) = geometry.letterbox();
      let sx = geometry.source_width as f32 * scale;
      let sy = geometry.source_height as f32 * scale;
      PixelRect {
        left: bbox.left * sx + offset_x,
        top: bbox.top * sy + offset_y,
        right: bbox.right * sx + offset_x,
        bottom: bbox.bottom * sy + offset_y,
      }
    }
    FitPolicy::Fill => {
      let sx = geometry.surface_width as f32;
      let sy = geometry.surface_height as f32;
      PixelRect {
        left: bbox.left * sx,
        top: bbox.top * sy,
        right: bbox.right * sx,
        bottom: bbox.bottom * sy,
      }
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappedDetection {
  pub detection: Detection,
  pub rect: PixelRect,
}

pub fn map_detections(detections: &[Detection], geometry: &DisplayGeometry) -> Vec<MappedDetection> {
  detections
    .iter()
    .map(|detection| MappedDetection {
      rect: map_to_surface(&detection.bbox, geometry),
      detection: detection.clone(),
    })
    .collect()
}
