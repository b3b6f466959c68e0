// 该文件是 Kanjian （看见） 项目的一部分。
// src/geometry.rs - 矩形与检测结果定义
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

use serde::{Deserialize, Serialize};

/// 轴对齐矩形，坐标位于检测器输入空间（例如 416x416）
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
  /// 左上角 x 坐标，解码后可能为负
  pub x: f32,
  /// 左上角 y 坐标，解码后可能为负
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl Rect {
  pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  /// 由中心点与宽高构造
  pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
    Self::new(cx - width / 2.0, cy - height / 2.0, width, height)
  }

  pub fn right(&self) -> f32 {
    self.x + self.width
  }

  pub fn bottom(&self) -> f32 {
    self.y + self.height
  }

  pub fn center(&self) -> (f32, f32) {
    (self.x + self.width / 2.0, self.y + self.height / 2.0)
  }

  pub fn area(&self) -> f32 {
    self.width.max(0.0) * self.height.max(0.0)
  }

  /// 将矩形裁剪到 `[0, bound_w] x [0, bound_h]` 范围内，结果宽高非负
  pub fn clamp_to(&self, bound_w: f32, bound_h: f32) -> Rect {
    let x_min = self.x.clamp(0.0, bound_w);
    let y_min = self.y.clamp(0.0, bound_h);
    let x_max = self.right().clamp(0.0, bound_w);
    let y_max = self.bottom().clamp(0.0, bound_h);

    Rect {
      x: x_min,
      y: y_min,
      width: (x_max - x_min).max(0.0),
      height: (y_max - y_min).max(0.0),
    }
  }

  pub fn intersection_area(&self, other: &Rect) -> f32 {
    let x1 = self.x.max(other.x);
    let y1 = self.y.max(other.y);
    let x2 = self.right().min(other.right());
    let y2 = self.bottom().min(other.bottom());

    (x2 - x1).max(0.0) * (y2 - y1).max(0.0)
  }

  /// 计算交并比，并集为零时返回 0
  pub fn iou(&self, other: &Rect) -> f32 {
    let intersection = self.intersection_area(other);
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }
}

/// 单个检测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  /// 边界框（检测器输入空间）
  pub rect: Rect,
  /// 类别索引，同时作为渲染调色板的键
  pub class_id: usize,
  /// 类别名称
  pub label: String,
  /// 置信度 = 目标性 × 获胜类别概率
  pub confidence: f32,
}
