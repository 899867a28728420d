// 该文件是 Daowen （稻瘟） 项目的一部分。
// src/frame.rs - 帧与输入张量定义
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

use crate::config::{ChannelOrder, InputLayout};

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("帧尺寸不匹配: 期望 {expected}x{expected}, 实际 {width}x{height}")]
  SizeMismatch {
    expected: u32,
    width: u32,
    height: u32,
  },
}

/// 打包后的 RGB 帧，NHWC 排列，每像素 3 字节
#[derive(Debug, Clone, PartialEq)]
pub struct RgbNhwcFrame {
  width: u32,
  height: u32,
  data: Box<[u8]>,
}

impl RgbNhwcFrame {
  pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
    let expected = RGB_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  pub fn with_shape(width: u32, height: u32) -> Self {
    let size = RGB_CHANNELS * width as usize * height as usize;
    Self {
      width,
      height,
      data: vec![0u8; size].into_boxed_slice(),
    }
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }

  /// 将帧打包为 [0, 1] 浮点输入张量，帧尺寸必须等于模型输入尺寸
  pub fn to_input_tensor(
    &self,
    input_size: u32,
    order: ChannelOrder,
    layout: InputLayout,
  ) -> Result<InputTensor, FrameError> {
    if self.width != input_size || self.height != input_size {
      return Err(FrameError::SizeMismatch {
        expected: input_size,
        width: self.width,
        height: self.height,
      });
    }

    let plane = self.width as usize * self.height as usize;
    let mut data = vec![0f32; plane * RGB_CHANNELS];
    let channel_map: [usize; 3] = match order {
      ChannelOrder::Rgb => [0, 1, 2],
      ChannelOrder::Bgr => [2, 1, 0],
    };

    for (idx, pixel) in self.data.chunks_exact(RGB_CHANNELS).enumerate() {
      for (c, &src) in channel_map.iter().enumerate() {
        let value = pixel[src] as f32 / 255.0;
        match layout {
          InputLayout::Nhwc => data[idx * RGB_CHANNELS + c] = value,
          InputLayout::Nchw => data[c * plane + idx] = value,
        }
      }
    }

    Ok(InputTensor {
      shape: match layout {
        InputLayout::Nhwc => [1, input_size as usize, input_size as usize, RGB_CHANNELS],
        InputLayout::Nchw => [1, RGB_CHANNELS, input_size as usize, input_size as usize],
      },
      data,
    })
  }
}

/// 送入推理引擎的浮点张量
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
  shape: [usize; 4],
  data: Vec<f32>,
}

impl InputTensor {
  pub fn shape(&self) -> [usize; 4] {
    self.shape
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }
}

/// 一帧待检测图像，附带其原始尺寸用于坐标映射
#[derive(Debug, Clone)]
pub struct SourceFrame {
  pub index: u64,
  pub source_width: u32,
  pub source_height: u32,
  pub frame: RgbNhwcFrame,
}

/// 能够拉伸到模型输入尺寸、生成待检测帧的图像类型
pub trait ToSourceFrame {
  fn to_source_frame(&self, index: u64, input_size: u32) -> Result<SourceFrame, FrameError>;
}
