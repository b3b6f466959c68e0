// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/config.rs - 检测器配置
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::model::tensor::TensorShape;

/// 每个锚框的预测头部：tx, ty, tw, th, objectness
pub const BOX_INFO_FEATURE_COUNT: usize = 5;

const TINY_YOLO2_GRID: usize = 13;
const TINY_YOLO2_INPUT: f32 = 416.0;
const TINY_YOLO2_IOU_THRESH: f32 = 0.5;
const TINY_YOLO2_CONF_THRESH: f32 = 0.5;
const TINY_YOLO2_MAX_RESULTS: usize = 5;

/// Tiny YOLOv2 (VOC) 锚框，单位为网格单元
const TINY_YOLO2_ANCHORS: [(f32, f32); 5] = [
  (1.08, 1.19),
  (3.42, 4.41),
  (6.63, 11.38),
  (9.42, 5.11),
  (16.62, 10.52),
];

/// Pascal VOC 数据集类别名称
pub const VOC_CLASSES: [&str; 20] = [
  "aeroplane",
  "bicycle",
  "bird",
  "boat",
  "bottle",
  "bus",
  "car",
  "cat",
  "chair",
  "cow",
  "diningtable",
  "dog",
  "horse",
  "motorbike",
  "person",
  "pottedplant",
  "sheep",
  "sofa",
  "train",
  "tvmonitor",
];

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("锚框列表为空")]
  NoAnchors,
  #[error("第 {index} 个锚框尺寸无效: {width}x{height}")]
  InvalidAnchor { index: usize, width: f32, height: f32 },
  #[error("类别名称列表为空")]
  NoLabels,
  #[error("网格尺寸无效: {width}x{height}")]
  InvalidGrid { width: usize, height: usize },
  #[error("输入尺寸无效: {width}x{height}")]
  InvalidInputSize { width: f32, height: f32 },
  #[error("IOU 阈值必须位于 [0, 1]，实际为 {0}")]
  InvalidIouThreshold(f32),
  #[error("置信度阈值必须位于 [0, 1]，实际为 {0}")]
  InvalidConfidenceThreshold(f32),
  #[error("最大结果数必须至少为 1，实际为 {0}")]
  InvalidMaxResults(usize),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("配置解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

pub(crate) fn is_unit_interval(value: f32) -> bool {
  (0.0..=1.0).contains(&value)
}

/// 锚框宽高，单位为网格单元
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
  pub width: f32,
  pub height: f32,
}

impl From<(f32, f32)> for Anchor {
  fn from((width, height): (f32, f32)) -> Self {
    Anchor { width, height }
  }
}

/// 检测器配置，构造后不可变
///
/// 通过 [`DetectorConfigBuilder`] 或 JSON 配置文件创建，两种方式都会校验：
/// 锚框非空且尺寸为正、类别名称非空、网格与输入尺寸有效、阈值位于 [0, 1]、
/// 最大结果数至少为 1。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
  anchors: Vec<Anchor>,
  labels: Vec<String>,
  grid_width: usize,
  grid_height: usize,
  input_width: f32,
  input_height: f32,
  iou_threshold: f32,
  confidence_threshold: f32,
  max_results: usize,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      anchors: TINY_YOLO2_ANCHORS.iter().copied().map(Anchor::from).collect(),
      labels: VOC_CLASSES.iter().map(|s| s.to_string()).collect(),
      grid_width: TINY_YOLO2_GRID,
      grid_height: TINY_YOLO2_GRID,
      input_width: TINY_YOLO2_INPUT,
      input_height: TINY_YOLO2_INPUT,
      iou_threshold: TINY_YOLO2_IOU_THRESH,
      confidence_threshold: TINY_YOLO2_CONF_THRESH,
      max_results: TINY_YOLO2_MAX_RESULTS,
    }
  }
}

impl DetectorConfig {
  pub fn builder() -> DetectorConfigBuilder {
    DetectorConfigBuilder {
      config: DetectorConfig::default(),
    }
  }

  pub fn into_builder(self) -> DetectorConfigBuilder {
    DetectorConfigBuilder { config: self }
  }

  pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
    let config: DetectorConfig = serde_json::from_str(text)?;
    config.validate()?;
    Ok(config)
  }

  /// 从 JSON 配置文件加载，缺省字段取 Tiny YOLOv2 (VOC) 的默认值
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    info!("加载检测器配置: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    let config = Self::from_json_str(&text)?;
    debug!(
      "配置: {} 个锚框, {} 个类别, 网格 {}x{}",
      config.anchor_count(),
      config.class_count(),
      config.grid_width,
      config.grid_height
    );
    Ok(config)
  }

  fn validate(&self) -> Result<(), ConfigError> {
    if self.anchors.is_empty() {
      return Err(ConfigError::NoAnchors);
    }
    for (index, anchor) in self.anchors.iter().enumerate() {
      let valid = |v: f32| v.is_finite() && v > 0.0;
      if !valid(anchor.width) || !valid(anchor.height) {
        return Err(ConfigError::InvalidAnchor {
          index,
          width: anchor.width,
          height: anchor.height,
        });
      }
    }
    if self.labels.is_empty() {
      return Err(ConfigError::NoLabels);
    }
    if self.grid_width == 0 || self.grid_height == 0 {
      return Err(ConfigError::InvalidGrid {
        width: self.grid_width,
        height: self.grid_height,
      });
    }
    let valid_size = |v: f32| v.is_finite() && v > 0.0;
    if !valid_size(self.input_width) || !valid_size(self.input_height) {
      return Err(ConfigError::InvalidInputSize {
        width: self.input_width,
        height: self.input_height,
      });
    }
    if !is_unit_interval(self.iou_threshold) {
      return Err(ConfigError::InvalidIouThreshold(self.iou_threshold));
    }
    if !is_unit_interval(self.confidence_threshold) {
      return Err(ConfigError::InvalidConfidenceThreshold(
        self.confidence_threshold,
      ));
    }
    if self.max_results == 0 {
      return Err(ConfigError::InvalidMaxResults(self.max_results));
    }
    Ok(())
  }

  pub fn anchors(&self) -> &[Anchor] {
    &self.anchors
  }

  pub fn labels(&self) -> &[String] {
    &self.labels
  }

  pub fn label(&self, class_id: usize) -> Option<&str> {
    self.labels.get(class_id).map(String::as_str)
  }

  pub fn anchor_count(&self) -> usize {
    self.anchors.len()
  }

  pub fn class_count(&self) -> usize {
    self.labels.len()
  }

  /// 单个锚框占用的通道数
  pub fn box_stride(&self) -> usize {
    BOX_INFO_FEATURE_COUNT + self.class_count()
  }

  pub fn channels(&self) -> usize {
    self.anchor_count() * self.box_stride()
  }

  pub fn grid_width(&self) -> usize {
    self.grid_width
  }

  pub fn grid_height(&self) -> usize {
    self.grid_height
  }

  pub fn input_width(&self) -> f32 {
    self.input_width
  }

  pub fn input_height(&self) -> f32 {
    self.input_height
  }

  pub fn cell_width(&self) -> f32 {
    self.input_width / self.grid_width as f32
  }

  pub fn cell_height(&self) -> f32 {
    self.input_height / self.grid_height as f32
  }

  pub fn iou_threshold(&self) -> f32 {
    self.iou_threshold
  }

  pub fn confidence_threshold(&self) -> f32 {
    self.confidence_threshold
  }

  pub fn max_results(&self) -> usize {
    self.max_results
  }

  /// 推理输出张量应有的形状
  pub fn expected_shape(&self) -> TensorShape {
    TensorShape::new(self.channels(), self.grid_height, self.grid_width)
  }
}

pub struct DetectorConfigBuilder {
  config: DetectorConfig,
}

impl DetectorConfigBuilder {
  pub fn anchors<A: Into<Anchor>>(mut self, anchors: impl IntoIterator<Item = A>) -> Self {
    self.config.anchors = anchors.into_iter().map(Into::into).collect();
    self
  }

  pub fn labels<S: Into<String>>(mut self, labels: impl IntoIterator<Item = S>) -> Self {
    self.config.labels = labels.into_iter().map(Into::into).collect();
    self
  }

  pub fn grid(mut self, width: usize, height: usize) -> Self {
    self.config.grid_width = width;
    self.config.grid_height = height;
    self
  }

  pub fn input_size(mut self, width: f32, height: f32) -> Self {
    self.config.input_width = width;
    self.config.input_height = height;
    self
  }

  pub fn iou_threshold(mut self, threshold: f32) -> Self {
    self.config.iou_threshold = threshold;
    self
  }

  pub fn confidence_threshold(mut self, threshold: f32) -> Self {
    self.config.confidence_threshold = threshold;
    self
  }

  pub fn max_results(mut self, max_results: usize) -> Self {
    self.config.max_results = max_results;
    self
  }

  pub fn build(self) -> Result<DetectorConfig, ConfigError> {
    self.config.validate()?;
    Ok(self.config)
  }
}
