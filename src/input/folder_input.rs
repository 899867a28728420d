// 该文件是 Daowen （稻瘟） 项目的一部分。
// src/input/folder_input.rs - 目录图像序列输入
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

use std::{
  path::PathBuf,
  thread,
  time::{Duration, Instant},
};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, url_to_path};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Error, Debug)]
pub enum FolderInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("目录中没有图像文件: {0}")]
  Empty(PathBuf),
  #[error("参数无效: {0}")]
  InvalidParameter(String),
}

/// 按文件名顺序读取目录中的图像，模拟相机帧流
///
/// 查询参数：`fps=N` 按给定帧率节拍输出，`loop` 读完后从头开始。
pub struct FolderInput {
  files: Vec<PathBuf>,
  cursor: usize,
  looping: bool,
  frame_interval: Option<Duration>,
  next_deadline: Option<Instant>,
  loaded_in_pass: bool,
}

impl FromUrlWithScheme for FolderInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for FolderInput {
  type Error = FolderInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(FolderInputError::SchemeMismatch);
    }

    let mut looping = false;
    let mut frame_interval = None;
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "loop" => looping = true,
        "fps" => {
          let fps: f64 = v
            .parse()
            .map_err(|_| FolderInputError::InvalidParameter(format!("fps={}", v)))?;
          if !(fps > 0.0 && fps.is_finite()) {
            return Err(FolderInputError::InvalidParameter(format!("fps={}", v)));
          }
          frame_interval = Some(Duration::from_secs_f64(1.0 / fps));
        }
        _ => {}
      }
    }

    let directory = url_to_path(url);
    let mut files = Vec::new();
    for entry in std::fs::read_dir(&directory)? {
      let path = entry?.path();
      let is_image = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
      if is_image && path.is_file() {
        files.push(path);
      }
    }
    if files.is_empty() {
      return Err(FolderInputError::Empty(directory));
    }
    files.sort();
    info!("目录 {} 中共有 {} 张图像", directory.display(), files.len());

    Ok(FolderInput {
      files,
      cursor: 0,
      looping,
      frame_interval,
      next_deadline: None,
      loaded_in_pass: false,
    })
  }
}

impl FolderInput {
  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }

  fn pace(&mut self) {
    let Some(interval) = self.frame_interval else {
      return;
    };
    let now = Instant::now();
    if let Some(deadline) = self.next_deadline
      && deadline > now
    {
      thread::sleep(deadline - now);
    }
    self.next_deadline = Some(Instant::now() + interval);
  }
}

impl Iterator for FolderInput {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      if self.cursor == self.files.len() {
        // 一整轮都没有读到图像时停止，避免空转
        if !self.looping || !self.loaded_in_pass {
          return None;
        }
        self.cursor = 0;
        self.loaded_in_pass = false;
      }

      let path = &self.files[self.cursor];
      self.cursor += 1;
      let image = ImageReader::open(path)
        .map_err(image::ImageError::IoError)
        .and_then(|reader| reader.decode());
      match image {
        Ok(image) => {
          self.loaded_in_pass = true;
          self.pace();
          return Some(image.to_rgb8());
        }
        Err(e) => warn!("跳过无法读取的图像 {}: {}", path.display(), e),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use image::Rgb;

  use super::*;

  fn fixture() -> tempfile::TempDir {
    let fixture = tempfile::tempdir().unwrap();
    let directory = fixture.path();
    RgbImage::from_pixel(2, 2, Rgb([200, 0, 0]))
      .save(directory.join("b.png"))
      .unwrap();
    RgbImage::from_pixel(3, 1, Rgb([0, 200, 0]))
      .save(directory.join("a.png"))
      .unwrap();
    std::fs::write(directory.join("notes.txt"), "not an image").unwrap();
    std::fs::write(directory.join("c.jpg"), "broken").unwrap();
    fixture
  }

  fn url(directory: &std::path::Path, query: &str) -> Url {
    Url::parse(&format!("folder://{}{}", directory.display(), query)).unwrap()
  }

  #[test]
  fn reads_images_in_name_order_and_skips_broken_files() {
    let directory = fixture();
    let input = FolderInput::from_url(&url(directory.path(), "")).unwrap();
    assert_eq!(input.len(), 3);
    let sizes: Vec<(u32, u32)> = input.map(|image| image.dimensions()).collect();
    assert_eq!(sizes, vec![(3, 1), (2, 2)]);
  }

  #[test]
  fn loops_when_requested() {
    let directory = fixture();
    let input = FolderInput::from_url(&url(directory.path(), "?loop")).unwrap();
    let sizes: Vec<(u32, u32)> = input.take(5).map(|image| image.dimensions()).collect();
    assert_eq!(sizes, vec![(3, 1), (2, 2), (3, 1), (2, 2), (3, 1)]);
  }

  #[test]
  fn rejects_bad_parameters_and_empty_directories() {
    let directory = fixture();
    assert!(matches!(
      FolderInput::from_url(&url(directory.path(), "?fps=0")),
      Err(FolderInputError::InvalidParameter(_))
    ));

    let empty = tempfile::tempdir().unwrap();
    assert!(matches!(
      FolderInput::from_url(&url(empty.path(), "")),
      Err(FolderInputError::Empty(_))
    ));
  }
}
