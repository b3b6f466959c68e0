// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::path::{Path, PathBuf};

use chrono::Local;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, decode_url_path,
  frame::{FrameSource, ImageFrame},
  model::DetectResult,
  output::{
    Render,
    draw::{Draw, DrawError},
    draw_from_url,
  },
};

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("绘制器错误: {0}")]
  DrawError(#[from] DrawError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("帧没有文件名，无法写入目录 {0}")]
  MissingFrameName(PathBuf),
}

/// 在原图上绘制检测结果并保存到文件
///
/// 目标为目录（已存在的目录或以 `/` 结尾）时，使用帧的文件名。
pub struct SaveImageFileOutput {
  path: PathBuf,
  is_directory: bool,
  draw: Draw,
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveImageFileOutput::new(decode_url_path(uri), draw_from_url(uri)?))
  }
}

impl SaveImageFileOutput {
  pub fn new(path: impl AsRef<str>, draw: Draw) -> Self {
    let path = path.as_ref();
    let path_buf = PathBuf::from(path);
    SaveImageFileOutput {
      is_directory: path.ends_with('/') || path_buf.is_dir(),
      path: path_buf,
      draw,
    }
  }

  /// 该帧最终写入的路径（不含时间戳回退）
  pub fn target_path(&self, frame: &impl FrameSource) -> Result<PathBuf, SaveImageFileError> {
    if !self.is_directory {
      return Ok(self.path.clone());
    }
    let name = frame
      .file_name()
      .ok_or_else(|| SaveImageFileError::MissingFrameName(self.path.clone()))?;
    Ok(self.path.join(name))
  }

  fn save_image(&self, image: image::RgbImage, target: &Path) -> Result<(), SaveImageFileError> {
    if let Some(parent) = target.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let target = prepare_target(target);
    image.save(&target)?;
    info!("保存图像到文件: {}", target.display());

    Ok(())
  }
}

/// 删除已存在的目标文件；删除失败时改用带时间戳的文件名
fn prepare_target(target: &Path) -> PathBuf {
  if !target.exists() {
    return target.to_path_buf();
  }
  match std::fs::remove_file(target) {
    Ok(()) => target.to_path_buf(),
    Err(e) => {
      let fallback = timestamped_path(target, &Local::now().format("%Y%m%d_%H%M%S").to_string());
      warn!(
        "无法删除已存在的文件 {} ({})，改为写入 {}",
        target.display(),
        e,
        fallback.display()
      );
      fallback
    }
  }
}

fn timestamped_path(target: &Path, stamp: &str) -> PathBuf {
  let stem = target
    .file_stem()
    .map(|s| s.to_string_lossy().into_owned())
    .unwrap_or_default();
  let name = match target.extension() {
    Some(ext) => format!("{}_{}.{}", stem, stamp, ext.to_string_lossy()),
    None => format!("{}_{}", stem, stamp),
  };
  target.with_file_name(name)
}

impl Render<ImageFrame, DetectResult> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &ImageFrame, result: &DetectResult) -> Result<(), Self::Error> {
    let target = self.target_path(frame)?;
    let image = self.draw.draw_detection(frame, result);
    self.save_image(image, &target)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  fn frame(name: &str) -> ImageFrame {
    ImageFrame::new(
      format!("/input/{name}"),
      RgbImage::from_pixel(16, 16, Rgb([10, 20, 30])),
    )
  }

  #[test]
  fn directory_target_uses_frame_name() {
    let dir = tempfile::tempdir().unwrap();
    let output = SaveImageFileOutput::new(format!("{}/", dir.path().display()), Draw::default());
    assert_eq!(
      output.target_path(&frame("dog.jpg")).unwrap(),
      dir.path().join("dog.jpg")
    );

    // 已存在的目录即使不以 `/` 结尾也按目录处理
    let output = SaveImageFileOutput::new(dir.path().display().to_string(), Draw::default());
    assert_eq!(
      output.target_path(&frame("cat.png")).unwrap(),
      dir.path().join("cat.png")
    );
  }

  #[test]
  fn file_target_is_used_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("result.png");
    let output = SaveImageFileOutput::new(path.display().to_string(), Draw::default());
    assert_eq!(output.target_path(&frame("dog.jpg")).unwrap(), path);
  }

  #[test]
  fn renders_into_new_nested_directory_and_overwrites() {
    let dir = tempfile::tempdir().unwrap();
    let target_dir = dir.path().join("a").join("b");
    let url = Url::parse(&format!("image://{}/", target_dir.display())).unwrap();
    let output = SaveImageFileOutput::from_url(&url).unwrap();

    let result = DetectResult::new(Vec::new(), 416.0, 416.0);
    output.render_result(&frame("dog.png"), &result).unwrap();
    output.render_result(&frame("dog.png"), &result).unwrap();

    let saved = image::open(target_dir.join("dog.png")).unwrap().to_rgb8();
    assert_eq!(saved.get_pixel(3, 3), &Rgb([10, 20, 30]));
    assert_eq!(std::fs::read_dir(&target_dir).unwrap().count(), 1);
  }

  #[test]
  fn output_url_with_space_is_decoded() {
    let dir = tempfile::tempdir().unwrap();
    let target_dir = dir.path().join("検出 結果");
    let url = Url::parse(&format!("image://{}/", target_dir.display())).unwrap();
    let output = SaveImageFileOutput::from_url(&url).unwrap();

    output
      .render_result(&frame("dog.png"), &DetectResult::new(Vec::new(), 416.0, 416.0))
      .unwrap();
    assert!(target_dir.join("dog.png").is_file());
  }

  #[test]
  fn timestamped_name_keeps_extension() {
    assert_eq!(
      timestamped_path(Path::new("/out/dog.png"), "20260101_120000"),
      PathBuf::from("/out/dog_20260101_120000.png")
    );
    assert_eq!(
      timestamped_path(Path::new("/out/dog"), "20260101_120000"),
      PathBuf::from("/out/dog_20260101_120000")
    );
  }
}
