// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/tensor_file.rs - 张量文件推理后端
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

use std::{marker::PhantomData, path::PathBuf};

use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, decode_url_path,
  frame::FrameSource,
  model::{Inference, RawTensor, TensorShape},
};

const TENSOR_FILE_EXTENSION: &str = "bin";

#[derive(Error, Debug)]
pub enum TensorFileError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无法读取张量文件 {}: {source}", .path.display())]
  ReadError {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("张量文件 {} 长度 {len} 不是 4 的倍数", .path.display())]
  RaggedLength { path: PathBuf, len: usize },
  #[error("帧 {} 没有可用的文件名", .0.display())]
  MissingFrameName(PathBuf),
}

/// 回放推理输出：读取小端 `f32` 扁平张量文件
///
/// - `tensor:///path/out.bin`：每一帧都使用同一个张量
/// - `tensor:///path/dir`：目录时按帧文件名查找 `<dir>/<stem>.bin`
pub struct TensorFileInference<Frame> {
  path: PathBuf,
  shape: TensorShape,
  _phantom: PhantomData<fn(&Frame)>,
}

pub struct TensorFileBuilder {
  path: PathBuf,
}

impl FromUrlWithScheme for TensorFileBuilder {
  const SCHEME: &'static str = "tensor";
}

impl FromUrl for TensorFileBuilder {
  type Error = TensorFileError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(TensorFileError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    Ok(TensorFileBuilder {
      path: PathBuf::from(decode_url_path(url)),
    })
  }
}

impl TensorFileBuilder {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  /// 张量形状由检测器配置声明
  pub fn build<Frame>(self, shape: TensorShape) -> TensorFileInference<Frame> {
    info!("张量文件来源: {}, 形状: {}", self.path.display(), shape);
    TensorFileInference {
      path: self.path,
      shape,
      _phantom: PhantomData,
    }
  }
}

impl<Frame: FrameSource> TensorFileInference<Frame> {
  fn tensor_path(&self, frame: &Frame) -> Result<PathBuf, TensorFileError> {
    if !self.path.is_dir() {
      return Ok(self.path.clone());
    }

    let stem = frame
      .file_stem()
      .ok_or_else(|| TensorFileError::MissingFrameName(frame.source_path().to_path_buf()))?;
    Ok(self.path.join(format!("{stem}.{TENSOR_FILE_EXTENSION}")))
  }
}

fn read_tensor_file(path: PathBuf, shape: TensorShape) -> Result<RawTensor, TensorFileError> {
  let bytes = match std::fs::read(&path) {
    Ok(bytes) => bytes,
    Err(source) => {
      error!("读取张量文件失败: {}: {}", path.display(), source);
      return Err(TensorFileError::ReadError { path, source });
    }
  };

  if bytes.len() % 4 != 0 {
    return Err(TensorFileError::RaggedLength {
      path,
      len: bytes.len(),
    });
  }

  let data: Vec<f32> = bytes
    .chunks_exact(4)
    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
    .collect();
  debug!("读取张量文件 {}: {} 个元素", path.display(), data.len());

  Ok(RawTensor::new(data, shape))
}

impl<Frame: FrameSource> Inference for TensorFileInference<Frame> {
  type Input = Frame;
  type Error = TensorFileError;

  fn run(&self, input: &Self::Input) -> Result<RawTensor, Self::Error> {
    let path = self.tensor_path(input)?;
    read_tensor_file(path, self.shape)
  }
}
