// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::path::Path;

use image::ImageReader;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, decode_url_path, frame::ImageFrame};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemaMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 单张图像，只产生一帧
pub struct ImageFileInput {
  frame: Option<ImageFrame>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    Self::open(decode_url_path(url))
  }
}

impl ImageFileInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let frame = load_image_frame(path.as_ref())?;
    Ok(ImageFileInput { frame: Some(frame) })
  }
}

pub(crate) fn load_image_frame(path: &Path) -> Result<ImageFrame, ImageFileInputError> {
  let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
  info!(
    "读取图像: {} ({}x{})",
    path.display(),
    image.width(),
    image.height()
  );
  Ok(ImageFrame::new(path, image.to_rgb8()))
}

impl Iterator for ImageFileInput {
  type Item = ImageFrame;

  fn next(&mut self) -> Option<Self::Item> {
    self.frame.take()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  #[test]
  fn yields_single_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("red.png");
    RgbImage::from_pixel(8, 6, Rgb([255, 0, 0]))
      .save(&path)
      .unwrap();

    let url = Url::parse(&format!("image://{}", path.display())).unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();

    let frame = input.next().unwrap();
    assert_eq!((frame.width(), frame.height()), (8, 6));
    assert_eq!(frame.image().get_pixel(0, 0), &Rgb([255, 0, 0]));
    assert!(input.next().is_none());
  }

  #[test]
  fn path_with_space_and_non_ascii_is_opened() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("my photos");
    std::fs::create_dir_all(&folder).unwrap();
    let path = folder.join("写真.png");
    RgbImage::new(3, 2).save(&path).unwrap();

    let url = Url::parse(&format!("image://{}", path.display())).unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();
    assert_eq!(input.next().unwrap().width(), 3);
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("folder:///tmp/x.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemaMismatch)
    ));
  }

  #[test]
  fn missing_file_is_io_error() {
    let err = ImageFileInput::open("/definitely/not/here.png").err().unwrap();
    assert!(matches!(err, ImageFileInputError::IoError(_)));
  }
}
