// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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
  path::Path,
  sync::atomic::{AtomicBool, Ordering},
};

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
  rect::Rect as PixelRect,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  frame::ImageFrame,
  geometry::{Detection, Rect},
  model::DetectResult,
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_HEIGHT: i32 = 20;
const LABEL_CHAR_WIDTH: f32 = 9.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const LABEL_TEXT_COLOR: [u8; 3] = [0, 0, 0];
const BOX_THICKNESS: i32 = 3;

/// 未指定字体时依次尝试的系统字体
const SYSTEM_FONT_PATHS: &[&str] = &[
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
  "/usr/share/fonts/liberation-sans/LiberationSans-Regular.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
  "/Library/Fonts/Arial.ttf",
  "C:\\Windows\\Fonts\\arial.ttf",
];

/// 按类别索引循环使用的默认颜色
const DEFAULT_PALETTE: [[u8; 3]; 21] = [
  [240, 230, 140], // khaki
  [255, 0, 255],   // fuchsia
  [192, 192, 192], // silver
  [65, 105, 225],  // royal blue
  [0, 128, 0],     // green
  [255, 140, 0],   // dark orange
  [128, 0, 128],   // purple
  [255, 215, 0],   // gold
  [255, 0, 0],     // red
  [127, 255, 212], // aquamarine
  [0, 255, 0],     // lime
  [240, 248, 255], // alice blue
  [160, 82, 45],   // sienna
  [218, 112, 214], // orchid
  [210, 180, 140], // tan
  [255, 182, 193], // light pink
  [255, 255, 0],   // yellow
  [255, 105, 180], // hot pink
  [107, 142, 35],  // olive drab
  [244, 164, 96],  // sandy brown
  [0, 206, 209],   // dark turquoise
];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法读取字体文件: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
  #[error("记录序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 类别索引到显示颜色的查找表
#[derive(Debug, Clone)]
pub struct Palette {
  colors: Vec<Rgb<u8>>,
}

impl Default for Palette {
  fn default() -> Self {
    Self {
      colors: DEFAULT_PALETTE.iter().map(|c| Rgb(*c)).collect(),
    }
  }
}

impl Palette {
  pub fn color(&self, class_id: usize) -> Rgb<u8> {
    self.colors[class_id % self.colors.len()]
  }
}

/// 将检测器输入空间的矩形映射到图像像素空间
///
/// 先裁剪到输入范围，再按宽高比例线性缩放；面积为零时返回 `None`。
pub fn to_pixel_rect(
  rect: &Rect,
  input_size: (f32, f32),
  image_size: (u32, u32),
) -> Option<PixelRect> {
  let (input_w, input_h) = input_size;
  let (image_w, image_h) = image_size;
  let clamped = rect.clamp_to(input_w, input_h);

  let scale_x = image_w as f32 / input_w;
  let scale_y = image_h as f32 / input_h;

  let x = (clamped.x * scale_x).floor() as i32;
  let y = (clamped.y * scale_y).floor() as i32;
  let width = (clamped.width * scale_x).round() as u32;
  let height = (clamped.height * scale_y).round() as u32;

  let width = width.min(image_w.saturating_sub(x as u32));
  let height = height.min(image_h.saturating_sub(y as u32));

  if width == 0 || height == 0 {
    return None;
  }
  Some(PixelRect::at(x, y).of_size(width, height))
}

pub fn label_text(detection: &Detection) -> String {
  format!(
    "{} ({:.0}%)",
    detection.label,
    detection.confidence * 100.0
  )
}

pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  palette: Palette,
  font_warned: AtomicBool,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      palette: Palette::default(),
      font_warned: AtomicBool::new(false),
    }
  }
}

impl Draw {
  pub fn load_font(path: impl AsRef<Path>) -> Result<FontArc, DrawError> {
    let path = path.as_ref();
    info!("加载字体文件: {}", path.display());
    let data = std::fs::read(path)?;
    Ok(FontArc::try_from_vec(data)?)
  }

  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = Some(font);
    self
  }

  /// 在常见的系统字体位置中查找第一个可用字体
  pub fn system_font() -> Option<FontArc> {
    SYSTEM_FONT_PATHS.iter().find_map(|path| {
      if !Path::new(path).is_file() {
        return None;
      }
      match Self::load_font(path) {
        Ok(font) => Some(font),
        Err(e) => {
          debug!("跳过无法加载的系统字体 {}: {}", path, e);
          None
        }
      }
    })
  }

  /// 没有字体时尝试使用系统字体
  pub fn or_system_font(self) -> Self {
    if self.font.is_some() {
      return self;
    }
    match Self::system_font() {
      Some(font) => self.with_font(font),
      None => self,
    }
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, rect: PixelRect, text: &str, color: Rgb<u8>) {
    // 向内加粗
    for t in 0..BOX_THICKNESS {
      let width = rect.width() as i32 - 2 * t;
      let height = rect.height() as i32 - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let inner =
        PixelRect::at(rect.left() + t, rect.top() + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, inner, color);
    }

    // 标签放在边框上方，空间不足时贴住图像顶部
    let text_width = (text.chars().count() as f32 * self.label_char_width) as i32;
    let label_x = rect.left().max(0);
    let label_y = (rect.top() - self.label_text_height - 1).max(0);
    let max_width = (image.width() as i32 - label_x).max(0);
    let label_width = text_width.min(max_width);

    if label_width <= 0 {
      return;
    }

    let background = PixelRect::at(label_x, label_y)
      .of_size(label_width as u32, self.label_text_height as u32);
    draw_filled_rect_mut(image, background, color);

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        Rgb(LABEL_TEXT_COLOR),
        label_x,
        label_y + self.label_text_vertical_padding,
        PxScale::from(self.font_size),
        font,
        text,
      );
    }
  }

  /// 在图像上绘制检测框和标签
  pub fn draw_detections_on_image(&self, image: &mut RgbImage, result: &DetectResult) {
    if self.font.is_none() && !result.is_empty() && !self.font_warned.swap(true, Ordering::Relaxed)
    {
      warn!("未找到可用字体，标签只绘制背景条；可用 ?font=<路径> 指定字体");
    }

    let input_size = (result.input_width, result.input_height);
    for detection in result.iter() {
      let Some(rect) = to_pixel_rect(&detection.rect, input_size, image.dimensions()) else {
        debug!("跳过图像范围外的检测框: {:?}", detection.rect);
        continue;
      };
      let color = self.palette.color(detection.class_id);
      self.draw_bbox_with_label(image, rect, &label_text(detection), color);
    }
  }

  pub fn draw_detection(&self, frame: &ImageFrame, result: &DetectResult) -> RgbImage {
    let mut image = frame.image().clone();
    self.draw_detections_on_image(&mut image, result);
    image
  }
}

/// 检测记录的文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
  Json,
  Text,
}

impl RecordFormat {
  pub fn extension(&self) -> &'static str {
    match self {
      RecordFormat::Json => "json",
      RecordFormat::Text => "txt",
    }
  }
}

/// 将检测结果写在图像旁边的同名记录文件中
pub struct Record {
  pub format: RecordFormat,
}

impl Record {
  pub fn render(&self, result: &DetectResult) -> Result<String, DrawError> {
    let content = match self.format {
      RecordFormat::Json => serde_json::to_string_pretty(&result.items)?,
      RecordFormat::Text => result
        .iter()
        .map(|item| {
          format!(
            "{}, {:.4}, {:.4}, {:.4}, {:.4}, {:.4}",
            item.label,
            item.confidence,
            item.rect.x,
            item.rect.y,
            item.rect.width,
            item.rect.height
          )
        })
        .collect::<Vec<_>>()
        .join("\n"),
    };
    Ok(content)
  }

  pub fn record(&self, result: &DetectResult, image_path: &Path) -> Result<(), DrawError> {
    let path = image_path.with_extension(self.format.extension());
    std::fs::write(&path, self.render(result)?)?;
    debug!("写入检测记录: {}", path.display());
    Ok(())
  }
}
