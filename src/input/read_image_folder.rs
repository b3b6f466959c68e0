// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/read_image_folder.rs - 图像目录输入
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

use std::{collections::VecDeque, path::PathBuf};

use thiserror::Error;
use tracing::{error, info};
use url::Url;

use super::read_image_file::load_image_frame;
use crate::{FromUrl, FromUrlWithScheme, decode_url_path, frame::ImageFrame};

#[derive(Error, Debug)]
pub enum ImageFolderInputError {
  #[error("URI 方案不匹配")]
  SchemaMismatch,
  #[error("无法读取目录 {}: {source}", .path.display())]
  ReadDirError {
    path: PathBuf,
    source: std::io::Error,
  },
}

/// 目录中的所有图像（跳过 `.md` 文件），按文件名排序，逐帧解码
///
/// 无法解码的文件会记录错误并跳过。
pub struct ImageFolderInput {
  pending: VecDeque<PathBuf>,
}

impl FromUrlWithScheme for ImageFolderInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ImageFolderInput {
  type Error = ImageFolderInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ImageFolderInputError::SchemaMismatch);
    }
    Self::open(decode_url_path(url))
  }
}

impl ImageFolderInput {
  pub fn open(path: impl Into<PathBuf>) -> Result<Self, ImageFolderInputError> {
    let path = path.into();
    let read_dir_error = |source| ImageFolderInputError::ReadDirError {
      path: path.clone(),
      source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(&path).map_err(read_dir_error)? {
      let entry_path = entry.map_err(read_dir_error)?.path();
      // 只排除小写扩展名 `.md`
      let is_markdown = entry_path.extension().is_some_and(|ext| ext == "md");
      if entry_path.is_file() && !is_markdown {
        files.push(entry_path);
      }
    }
    files.sort();

    info!("目录 {} 中共有 {} 个候选图像", path.display(), files.len());
    Ok(ImageFolderInput {
      pending: files.into(),
    })
  }

  pub fn remaining(&self) -> usize {
    self.pending.len()
  }
}

impl Iterator for ImageFolderInput {
  type Item = ImageFrame;

  fn next(&mut self) -> Option<Self::Item> {
    while let Some(path) = self.pending.pop_front() {
      match load_image_frame(&path) {
        Ok(frame) => return Some(frame),
        Err(e) => error!("跳过无法读取的文件 {}: {}", path.display(), e),
      }
    }
    None
  }
}
