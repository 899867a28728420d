// 该文件是 Daowen （稻瘟） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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
  fmt,
  path::{Path, PathBuf},
  sync::Arc,
};

use ab_glyph::{FontVec, PxScale};
use clap::ValueEnum;
use image::{
  Rgb, RgbImage,
  imageops::{self, FilterType},
};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use url::Url;

use crate::{
  geometry::{DisplayGeometry, FitPolicy, GeometryError, PixelRect, map_to_surface},
  model::Detection,
};

const BOX_THICKNESS: i32 = 2;
const SCORE_BAR_HEIGHT: i32 = 4;
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_PADDING: i32 = 2;
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
// 按类别轮换的边框颜色
const PALETTE: [[u8; 3]; 4] = [[230, 25, 75], [60, 180, 75], [255, 225, 25], [0, 130, 200]];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("参数无效: {0}")]
  InvalidParameter(String),
  #[error("显示几何无效: {0}")]
  Geometry(#[from] GeometryError),
  #[error("字体文件读取错误: {0}")]
  FontIo(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  InvalidFont(PathBuf),
}

/// 标签字体，按文件路径比较
#[derive(Clone)]
pub struct LabelFont {
  path: PathBuf,
  font: Arc<FontVec>,
}

impl LabelFont {
  pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DrawError> {
    let path = path.as_ref().to_path_buf();
    let data = std::fs::read(&path)?;
    let font = FontVec::try_from_vec(data).map_err(|_| DrawError::InvalidFont(path.clone()))?;
    Ok(Self {
      path,
      font: Arc::new(font),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl fmt::Debug for LabelFont {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("LabelFont").field(&self.path).finish()
  }
}

impl PartialEq for LabelFont {
  fn eq(&self, other: &Self) -> bool {
    self.path == other.path
  }
}

/// 把源图像放到显示表面上并叠加检测框
///
/// 未指定表面尺寸时使用源图像尺寸。图像的摆放方式与 [`map_to_surface`] 使用同一个
/// [`DisplayGeometry`]，因此检测框总是与图像对齐。
/// 给定字体时在框上方写出 `类别 百分比`，否则只画置信度条。
#[derive(Debug, Clone, PartialEq)]
pub struct Draw {
  surface: Option<(u32, u32)>,
  fit_policy: FitPolicy,
  font: Option<LabelFont>,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      surface: None,
      fit_policy: FitPolicy::Fit,
      font: None,
    }
  }
}

impl Draw {
  pub fn with_surface(mut self, width: u32, height: u32) -> Self {
    self.surface = Some((width, height));
    self
  }

  pub fn with_fit_policy(mut self, policy: FitPolicy) -> Self {
    self.fit_policy = policy;
    self
  }

  pub fn with_font(mut self, font: LabelFont) -> Self {
    self.font = Some(font);
    self
  }

  /// 从 URL 查询参数 `width`、`height`、`fit`、`font` 读取显示设置
  pub fn from_query(url: &Url) -> Result<Self, DrawError> {
    let mut draw = Draw::default();
    let mut width = None;
    let mut height = None;

    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "width" => {
          width = Some(
            v.parse::<u32>()
              .map_err(|_| DrawError::InvalidParameter(format!("width={}", v)))?,
          )
        }
        "height" => {
          height = Some(
            v.parse::<u32>()
              .map_err(|_| DrawError::InvalidParameter(format!("height={}", v)))?,
          )
        }
        "fit" => {
          draw.fit_policy = FitPolicy::from_str(&v, true)
            .map_err(|_| DrawError::InvalidParameter(format!("fit={}", v)))?
        }
        "font" => draw.font = Some(LabelFont::from_file(&*v)?),
        _ => {}
      }
    }

    match (width, height) {
      (Some(w), Some(h)) => draw.surface = Some((w, h)),
      (None, None) => {}
      _ => {
        return Err(DrawError::InvalidParameter(
          "width 与 height 必须同时指定".to_string(),
        ));
      }
    }

    Ok(draw)
  }

  pub fn surface(&self) -> Option<(u32, u32)> {
    self.surface
  }

  pub fn fit_policy(&self) -> FitPolicy {
    self.fit_policy
  }

  pub fn font(&self) -> Option<&LabelFont> {
    self.font.as_ref()
  }

  pub fn geometry(&self, image: &RgbImage) -> Result<DisplayGeometry, DrawError> {
    let surface = self.surface.unwrap_or_else(|| image.dimensions());
    Ok(DisplayGeometry::new(
      image.dimensions(),
      surface,
      self.fit_policy,
    )?)
  }

  /// 按几何信息摆放源图像，`Fit` 留黑边，`Fill` 直接缩放到表面
  pub fn canvas(&self, image: &RgbImage, geometry: &DisplayGeometry) -> RgbImage {
    let (surface_width, surface_height) = geometry.surface_size();
    let content = geometry.content_rect();
    let width = (content.width().round() as u32).max(1);
    let height = (content.height().round() as u32).max(1);

    let resized = if (width, height) == image.dimensions() {
      image.clone()
    } else {
      imageops::resize(image, width, height, FilterType::Triangle)
    };

    if (width, height) == (surface_width, surface_height) {
      return resized;
    }

    let mut canvas = RgbImage::new(surface_width, surface_height);
    imageops::replace(
      &mut canvas,
      &resized,
      content.left.round() as i64,
      content.top.round() as i64,
    );
    canvas
  }

  pub fn draw_detections(
    &self,
    image: &RgbImage,
    detections: &[Detection],
  ) -> Result<RgbImage, DrawError> {
    let geometry = self.geometry(image)?;
    let mut canvas = self.canvas(image, &geometry);
    for detection in detections {
      let rect = map_to_surface(&detection.bbox, &geometry);
      let color = Rgb(PALETTE[detection.class_index % PALETTE.len()]);
      let (x0, y0, width) = draw_box(&mut canvas, &rect, color);
      match &self.font {
        Some(font) => draw_label(&mut canvas, font, detection, (x0, y0), color),
        None => draw_score_bar(&mut canvas, (x0, y0), width, detection.score, color),
      }
    }
    Ok(canvas)
  }
}

/// 画出 2 像素宽的边框，返回左上角与宽度
fn draw_box(canvas: &mut RgbImage, rect: &PixelRect, color: Rgb<u8>) -> (i32, i32, i32) {
  let x0 = rect.left.round() as i32;
  let y0 = rect.top.round() as i32;
  let width = (rect.right.round() as i32 - x0).max(1);
  let height = (rect.bottom.round() as i32 - y0).max(1);

  // 边框加粗为 2 像素
  for t in 0..BOX_THICKNESS {
    let w = (width - 2 * t).max(1) as u32;
    let h = (height - 2 * t).max(1) as u32;
    draw_hollow_rect_mut(canvas, Rect::at(x0 + t, y0 + t).of_size(w, h), color);
  }
  (x0, y0, width)
}

/// 边框上方的置信度条
fn draw_score_bar(
  canvas: &mut RgbImage,
  (x0, y0): (i32, i32),
  width: i32,
  score: f32,
  color: Rgb<u8>,
) {
  let bar_width = ((width as f32 * score.clamp(0.0, 1.0)).round() as u32).max(1);
  let bar_y = y0 - SCORE_BAR_HEIGHT - 1;
  if bar_y >= 0 {
    draw_filled_rect_mut(
      canvas,
      Rect::at(x0, bar_y).of_size(bar_width, SCORE_BAR_HEIGHT as u32),
      color,
    );
  }
}

/// 边框上方的 `类别 百分比` 标签，放不下时贴着图像顶部
fn draw_label(
  canvas: &mut RgbImage,
  font: &LabelFont,
  detection: &Detection,
  (x0, y0): (i32, i32),
  color: Rgb<u8>,
) {
  let text = format!(
    "{} {}%",
    detection.label,
    (detection.score.clamp(0.0, 1.0) * 100.0) as u32
  );
  let scale = PxScale::from(LABEL_FONT_SIZE);
  let (text_width, text_height) = text_size(scale, &*font.font, &text);

  let label_width = text_width as i32 + 2 * LABEL_PADDING;
  let label_height = text_height as i32 + 2 * LABEL_PADDING;
  let label_x = x0.max(0);
  let label_y = (y0 - label_height).max(0);
  let visible_width = label_width.min(canvas.width() as i32 - label_x);
  if visible_width <= 0 {
    return;
  }

  draw_filled_rect_mut(
    canvas,
    Rect::at(label_x, label_y).of_size(visible_width as u32, label_height as u32),
    color,
  );
  draw_text_mut(
    canvas,
    LABEL_TEXT_COLOR,
    label_x + LABEL_PADDING,
    label_y + LABEL_PADDING,
    scale,
    &*font.font,
    &text,
  );
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::BBox;

  fn white(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([255, 255, 255]))
  }

  fn detection(bbox: BBox, class_index: usize) -> Detection {
    Detection {
      bbox,
      score: 0.5,
      class_index,
      label: String::new(),
      anchor: 0,
    }
  }

  fn is_white(pixel: &Rgb<u8>) -> bool {
    pixel.0.iter().all(|&c| c >= 250)
  }

  #[test]
  fn fit_canvas_is_letterboxed() {
    let draw = Draw::default().with_surface(8, 8);
    let image = white(4, 2);
    let geometry = draw.geometry(&image).unwrap();
    let canvas = draw.canvas(&image, &geometry);
    assert_eq!(canvas.dimensions(), (8, 8));
    assert_eq!(canvas.get_pixel(4, 1), &Rgb([0, 0, 0]));
    assert_eq!(canvas.get_pixel(4, 6), &Rgb([0, 0, 0]));
    assert!(is_white(canvas.get_pixel(0, 2)));
    assert!(is_white(canvas.get_pixel(7, 5)));
  }

  #[test]
  fn fill_canvas_covers_surface() {
    let draw = Draw::default()
      .with_surface(8, 8)
      .with_fit_policy(FitPolicy::Fill);
    let image = white(4, 2);
    let geometry = draw.geometry(&image).unwrap();
    let canvas = draw.canvas(&image, &geometry);
    assert!(canvas.pixels().all(is_white));
  }

  #[test]
  fn boxes_are_drawn_at_mapped_position() {
    let draw = Draw::default();
    let image = white(100, 100);
    let canvas = draw
      .draw_detections(&image, &[detection(BBox::new(0.2, 0.2, 0.8, 0.8), 1)])
      .unwrap();
    let color = Rgb(PALETTE[1]);
    assert_eq!(canvas.get_pixel(20, 50), &color);
    assert_eq!(canvas.get_pixel(21, 50), &color);
    assert_eq!(canvas.get_pixel(50, 20), &color);
    assert!(is_white(canvas.get_pixel(50, 50)));
    assert!(is_white(canvas.get_pixel(10, 50)));
    // 置信度 0.5 的条只覆盖边框宽度的一半
    assert_eq!(canvas.get_pixel(30, 17), &color);
    assert!(is_white(canvas.get_pixel(70, 17)));
  }

  #[test]
  fn letterboxed_boxes_follow_the_image() {
    let draw = Draw::default().with_surface(200, 200);
    let image = white(100, 50);
    let canvas = draw
      .draw_detections(&image, &[detection(BBox::new(0.0, 0.0, 0.5, 1.0), 0)])
      .unwrap();
    // 内容区 200x100，上下各留 50 像素
    let color = Rgb(PALETTE[0]);
    assert_eq!(canvas.get_pixel(0, 100), &color);
    assert_eq!(canvas.get_pixel(50, 50), &color);
    assert_eq!(canvas.get_pixel(0, 20), &Rgb([0, 0, 0]));
  }

  #[test]
  fn parses_query_parameters() {
    let url = Url::parse("image:///tmp/out.png?width=1080&height=1440&fit=fill").unwrap();
    let draw = Draw::from_query(&url).unwrap();
    assert_eq!(draw.surface(), Some((1080, 1440)));
    assert_eq!(draw.fit_policy(), FitPolicy::Fill);

    let url = Url::parse("image:///tmp/out.png").unwrap();
    assert_eq!(Draw::from_query(&url).unwrap(), Draw::default());

    for query in ["width=10", "fit=zoom", "width=a&height=3"] {
      let url = Url::parse(&format!("image:///tmp/out.png?{}", query)).unwrap();
      assert!(matches!(
        Draw::from_query(&url),
        Err(DrawError::InvalidParameter(_))
      ));
    }
  }

  const FONT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/assets/DejaVuSans.ttf");

  fn url_with_font(font: &str) -> Url {
    let mut url = Url::parse("image:///tmp/out.png").unwrap();
    url.query_pairs_mut().append_pair("font", font);
    url
  }

  #[test]
  fn font_draws_label_above_box() {
    let draw = Draw::from_query(&url_with_font(FONT)).unwrap();
    assert_eq!(draw.font().map(LabelFont::path), Some(Path::new(FONT)));

    let image = white(200, 200);
    let mut blast = detection(BBox::new(0.2, 0.4, 0.8, 0.8), 0);
    blast.label = "Blast".to_string();
    blast.score = 0.72;
    let canvas = draw.draw_detections(&image, &[blast]).unwrap();
    let color = Rgb(PALETTE[0]);

    let font = draw.font().unwrap();
    let (text_width, text_height) =
      text_size(PxScale::from(LABEL_FONT_SIZE), &*font.font, "Blast 72%");
    assert!(text_width > 0 && text_height > 0);
    let label_height = text_height + 2 * LABEL_PADDING as u32;
    let label_top = 80 - label_height;

    // 标签背景紧贴在边框上方，从边框左侧开始
    assert_eq!(canvas.get_pixel(40, 79), &color);
    assert_eq!(canvas.get_pixel(40, label_top), &color);
    assert!(is_white(canvas.get_pixel(40, label_top - 1)));
    // 背景上有白色文字
    let text_pixels = (42..42 + text_width)
      .flat_map(|x| (label_top + 2..label_top + 2 + text_height).map(move |y| (x, y)))
      .filter(|&(x, y)| canvas.get_pixel(x, y) != &color)
      .count();
    assert!(text_pixels > 0);
    // 标签宽度按文字计算，而不是按置信度
    assert!(is_white(canvas.get_pixel(44 + text_width + 1, label_top + 1)));
  }

  #[test]
  fn bad_fonts_are_rejected() {
    assert!(matches!(
      Draw::from_query(&url_with_font("/nonexistent/daowen/font.ttf")),
      Err(DrawError::FontIo(_))
    ));
    let manifest = concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml");
    assert!(matches!(
      Draw::from_query(&url_with_font(manifest)),
      Err(DrawError::InvalidFont(_))
    ));
  }
}
