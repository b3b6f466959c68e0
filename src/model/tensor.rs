// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/tensor.rs - 推理输出张量
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

use std::fmt;

/// 张量逻辑形状 (C, H, W)，通道优先
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorShape {
  pub channels: usize,
  pub height: usize,
  pub width: usize,
}

impl TensorShape {
  pub const fn new(channels: usize, height: usize, width: usize) -> Self {
    Self {
      channels,
      height,
      width,
    }
  }

  pub fn len(&self) -> usize {
    self.channels * self.height * self.width
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// 单个通道平面的元素数量
  pub fn plane(&self) -> usize {
    self.height * self.width
  }

  /// (channel, row, col) 在扁平缓冲区中的偏移
  #[inline(always)]
  pub fn offset(&self, channel: usize, row: usize, col: usize) -> usize {
    channel * self.plane() + row * self.width + col
  }
}

impl fmt::Display for TensorShape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}x{}x{}", self.channels, self.height, self.width)
  }
}

/// 推理后端交给解码器的扁平张量，附带声明的形状
#[derive(Debug, Clone)]
pub struct RawTensor {
  data: Box<[f32]>,
  shape: TensorShape,
}

impl RawTensor {
  /// 不检查长度，长度与形状的一致性由解码器校验
  pub fn new(data: impl Into<Box<[f32]>>, shape: TensorShape) -> Self {
    Self {
      data: data.into(),
      shape,
    }
  }

  pub fn zeros(shape: TensorShape) -> Self {
    Self::new(vec![0.0; shape.len()], shape)
  }

  pub fn shape(&self) -> TensorShape {
    self.shape
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  /// 仅当缓冲区长度与形状一致时返回视图
  pub fn view(&self) -> Option<TensorView<'_>> {
    (self.data.len() == self.shape.len()).then_some(TensorView {
      data: &self.data,
      shape: self.shape,
    })
  }

  pub fn set(&mut self, channel: usize, row: usize, col: usize, value: f32) {
    let offset = self.shape.offset(channel, row, col);
    self.data[offset] = value;
  }
}

/// 借用的张量视图，长度已与形状校验一致
#[derive(Debug, Clone, Copy)]
pub struct TensorView<'a> {
  data: &'a [f32],
  shape: TensorShape,
}

impl<'a> TensorView<'a> {
  pub fn shape(&self) -> TensorShape {
    self.shape
  }

  #[inline(always)]
  pub fn at(&self, channel: usize, row: usize, col: usize) -> f32 {
    self.data[self.shape.offset(channel, row, col)]
  }
}
