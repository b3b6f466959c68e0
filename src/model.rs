// 该文件是 Kanjian （看见） 项目的一部分。
// src/model.rs - 模型
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

use crate::geometry::Detection;

/// 完整的检测模型：输入一帧，输出检测结果
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 推理引擎边界：输入一帧，输出原始张量
pub trait Inference {
  type Input;
  type Error;

  fn run(&self, input: &Self::Input) -> Result<RawTensor, Self::Error>;
}

/// 最终检测结果，矩形位于 `input_width x input_height` 的检测器输入空间
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
  pub input_width: f32,
  pub input_height: f32,
}

impl DetectResult {
  pub fn new(items: Vec<Detection>, input_width: f32, input_height: f32) -> Self {
    DetectResult {
      items: items.into_boxed_slice(),
      input_width,
      input_height,
    }
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.items.iter()
  }
}

impl<'a> IntoIterator for &'a DetectResult {
  type Item = &'a Detection;
  type IntoIter = std::slice::Iter<'a, Detection>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.iter()
  }
}

mod config;
mod decode;
mod pipeline;
mod suppress;
mod tensor;
mod tensor_file;

pub use self::config::{
  Anchor, BOX_INFO_FEATURE_COUNT, ConfigError, DetectorConfig, DetectorConfigBuilder, VOC_CLASSES,
};
pub use self::decode::{DecodeError, OutputDecoder, sigmoid, softmax_in_place};
pub use self::pipeline::{DetectionPipeline, Detector, DetectorError, PipelineError};
pub use self::suppress::{BoxSuppressor, SuppressError};
pub use self::tensor::{RawTensor, TensorShape, TensorView};
pub use self::tensor_file::{TensorFileBuilder, TensorFileError, TensorFileInference};
