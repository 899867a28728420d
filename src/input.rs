// 该文件是 Daowen （稻瘟） 项目的一部分。
// src/input.rs - 图像输入
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

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FrameError, RgbNhwcFrame, SourceFrame, ToSourceFrame},
};

mod folder_input;
mod read_image_file;

pub use self::folder_input::{FolderInput, FolderInputError};
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

/// 直接拉伸到模型输入尺寸，不保持宽高比
impl ToSourceFrame for RgbImage {
  fn to_source_frame(&self, index: u64, input_size: u32) -> Result<SourceFrame, FrameError> {
    let resized = image::imageops::resize(self, input_size, input_size, FilterType::Triangle);
    Ok(SourceFrame {
      index,
      source_width: self.width(),
      source_height: self.height(),
      frame: RgbNhwcFrame::new(input_size, input_size, resized.into_raw())?,
    })
  }
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[error("目录输入错误: {0}")]
  FolderInputError(#[from] FolderInputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  ReadImageFile(ImageFileInput),
  Folder(FolderInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ImageFileInput::SCHEME => Ok(InputWrapper::ReadImageFile(ImageFileInput::from_url(url)?)),
      FolderInput::SCHEME => Ok(InputWrapper::Folder(FolderInput::from_url(url)?)),
      other => Err(InputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Iterator for InputWrapper {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::ReadImageFile(input) => input.next(),
      InputWrapper::Folder(input) => input.next(),
    }
  }
}
