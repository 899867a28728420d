// 该文件是 Daowen （稻瘟） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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
  fs::OpenOptions,
  io::Write,
  path::{Path, PathBuf},
  sync::atomic::{AtomicU16, Ordering},
};

use chrono::{DateTime, Datelike, Utc};
use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::Detection,
  output::{
    Render,
    draw::{Draw, DrawError},
  },
  url_to_path,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("记录序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("绘制错误: {0}")]
  DrawError(#[from] DrawError),
}

/// 每天目录下的检测记录文件，每帧一行 JSON
pub const RECORD_FILE: &str = "detections.jsonl";

#[derive(Serialize)]
struct DetectionRecord<'a> {
  timestamp: String,
  image: String,
  source_width: u32,
  source_height: u32,
  detections: &'a [Detection],
}

/// 按日期分目录保存帧图像，并把检测记录追加到同目录的 [`RECORD_FILE`]
///
/// 查询参数：`always` 没有检测结果时也保存，`raw` 保存原图而不是叠加图，
/// 其余参数同 [`Draw::from_query`]。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Option<Draw>,
  frame_counter: AtomicU16,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");
    let raw = uri.query_pairs().any(|(k, _)| k == "raw");
    let draw = if raw {
      None
    } else {
      Some(Draw::from_query(uri)?)
    };

    Ok(DirectoryRecordOutput {
      directory: url_to_path(uri),
      draw,
      frame_counter: AtomicU16::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn frame_id(&self) -> u16 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn frame_path(&self, now: &DateTime<Utc>) -> Result<PathBuf, std::io::Error> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl Render<RgbImage, [Detection]> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &RgbImage, result: &[Detection]) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      return Ok(());
    }

    let now = Utc::now();
    let path = self.frame_path(&now)?;
    match &self.draw {
      Some(draw) => draw.draw_detections(frame, result)?.save(&path)?,
      None => frame.save(&path)?,
    }

    let record = DetectionRecord {
      timestamp: now.to_rfc3339(),
      image: path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default(),
      source_width: frame.width(),
      source_height: frame.height(),
      detections: result,
    };
    let mut line = serde_json::to_vec(&record)?;
    line.push(b'\n');
    OpenOptions::new()
      .create(true)
      .append(true)
      .open(path.with_file_name(RECORD_FILE))?
      .write_all(&line)?;

    debug!("记录 {} 个检测结果到 {}", result.len(), path.display());
    Ok(())
  }
}
