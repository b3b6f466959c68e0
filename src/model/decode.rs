// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/decode.rs - 网格检测器输出解码
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

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error};

use crate::{
  geometry::{Detection, Rect},
  model::{
    config::{BOX_INFO_FEATURE_COUNT, DetectorConfig},
    tensor::{RawTensor, TensorShape},
  },
};

#[derive(Error, Debug, PartialEq)]
pub enum DecodeError {
  #[error("张量形状不匹配: 期望 {expected}, 实际 {actual}")]
  ShapeMismatch {
    expected: TensorShape,
    actual: TensorShape,
  },
  #[error("张量长度不匹配: 期望 {expected}, 实际 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("张量在偏移 {offset} 处包含非有限值 {value}")]
  NonFiniteValue { offset: usize, value: f32 },
  #[error("单元 ({row}, {col}) 锚框 {anchor} 的宽高溢出")]
  BoxOverflow { row: usize, col: usize, anchor: usize },
}

pub fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

/// 原地计算 softmax，先减去最大值以避免溢出
///
/// 含 NaN 或最大值不是有限数时退化为均匀分布。
pub fn softmax_in_place(values: &mut [f32]) {
  let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  if !max.is_finite() || values.iter().any(|v| v.is_nan()) {
    let uniform = 1.0 / values.len() as f32;
    values.fill(uniform);
    return;
  }

  let mut sum = 0.0;
  for v in values.iter_mut() {
    *v = (*v - max).exp();
    sum += *v;
  }
  for v in values.iter_mut() {
    *v /= sum;
  }
}

/// 返回 (索引, 值)，相等时取最小索引
fn argmax(values: &[f32]) -> (usize, f32) {
  let mut best = (0, values[0]);
  for (idx, &v) in values.iter().enumerate().skip(1) {
    if v > best.1 {
      best = (idx, v);
    }
  }
  best
}

/// 将单张图像的输出张量解码为候选检测
///
/// 每个 (网格单元, 锚框) 产生一个候选，不做任何过滤；输出顺序为
/// 行、列、锚框。张量为通道优先布局，单元 (row, col) 上第 `a` 个锚框的
/// 第 `k` 个特征位于通道 `a * (5 + C) + k`：
/// `[tx, ty, tw, th, tobj, class_0 .. class_{C-1}]`。
pub struct OutputDecoder {
  config: Arc<DetectorConfig>,
}

impl OutputDecoder {
  pub fn new(config: Arc<DetectorConfig>) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  pub fn decode(&self, tensor: &RawTensor) -> Result<Vec<Detection>, DecodeError> {
    let config = &*self.config;
    let expected = config.expected_shape();

    if tensor.shape() != expected {
      error!("张量形状不匹配: 期望 {}, 实际 {}", expected, tensor.shape());
      return Err(DecodeError::ShapeMismatch {
        expected,
        actual: tensor.shape(),
      });
    }

    let view = tensor.view().ok_or_else(|| {
      error!(
        "张量长度不匹配: 期望 {}, 实际 {}",
        expected.len(),
        tensor.len()
      );
      DecodeError::LengthMismatch {
        expected: expected.len(),
        actual: tensor.len(),
      }
    })?;

    if let Some((offset, &value)) = tensor
      .data()
      .iter()
      .enumerate()
      .find(|(_, v)| !v.is_finite())
    {
      error!("张量在偏移 {} 处包含非有限值 {}", offset, value);
      return Err(DecodeError::NonFiniteValue { offset, value });
    }

    let (cell_w, cell_h) = (config.cell_width(), config.cell_height());
    let stride = config.box_stride();
    let class_count = config.class_count();

    let mut detections =
      Vec::with_capacity(config.grid_height() * config.grid_width() * config.anchor_count());
    let mut probs = vec![0.0f32; class_count];

    for row in 0..config.grid_height() {
      for col in 0..config.grid_width() {
        for (anchor_idx, anchor) in config.anchors().iter().enumerate() {
          let base = anchor_idx * stride;

          let tx = view.at(base, row, col);
          let ty = view.at(base + 1, row, col);
          let tw = view.at(base + 2, row, col);
          let th = view.at(base + 3, row, col);
          let tobj = view.at(base + 4, row, col);

          let cx = (col as f32 + sigmoid(tx)) * cell_w;
          let cy = (row as f32 + sigmoid(ty)) * cell_h;
          let width = tw.exp() * anchor.width * cell_w;
          let height = th.exp() * anchor.height * cell_h;
          if !width.is_finite() || !height.is_finite() {
            error!(
              "单元 ({}, {}) 锚框 {} 的宽高溢出: tw={}, th={}",
              row, col, anchor_idx, tw, th
            );
            return Err(DecodeError::BoxOverflow {
              row,
              col,
              anchor: anchor_idx,
            });
          }

          for (k, p) in probs.iter_mut().enumerate() {
            *p = view.at(base + BOX_INFO_FEATURE_COUNT + k, row, col);
          }
          softmax_in_place(&mut probs);
          let (class_id, class_prob) = argmax(&probs);

          detections.push(Detection {
            rect: Rect::from_center(cx, cy, width, height),
            class_id,
            label: config.labels()[class_id].clone(),
            confidence: sigmoid(tobj) * class_prob,
          });
        }
      }
    }

    debug!("解码得到 {} 个候选框", detections.len());
    Ok(detections)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  fn small_config() -> Arc<DetectorConfig> {
    Arc::new(
      DetectorConfig::builder()
        .anchors([(1.0_f32, 2.0_f32), (3.0, 1.5)])
        .labels(["a", "b", "c"])
        .grid(4, 3)
        .input_size(128.0, 96.0)
        .build()
        .unwrap(),
    )
  }

  #[test]
  fn sigmoid_values() {
    assert_eq!(sigmoid(0.0), 0.5);
    assert!(sigmoid(20.0) > 0.999_999);
    assert!(sigmoid(-20.0) < 1e-6);
  }

  #[test]
  fn argmax_prefers_lowest_index_on_ties() {
    assert_eq!(argmax(&[0.2, 0.4, 0.4]), (1, 0.4));
    assert_eq!(argmax(&[0.5, 0.5]), (0, 0.5));
  }

  #[test]
  fn emits_one_candidate_per_cell_and_anchor() {
    let config = Arc::new(DetectorConfig::default());
    let decoder = OutputDecoder::new(config.clone());
    let detections = decoder
      .decode(&RawTensor::zeros(config.expected_shape()))
      .unwrap();
    assert_eq!(detections.len(), 13 * 13 * 5);
    // 全零输入：目标性 0.5，类别均匀分布，平局取类别 0
    for det in &detections {
      assert!((det.confidence - 0.5 / 20.0).abs() < 1e-6);
      assert_eq!(det.class_id, 0);
      assert_eq!(det.label, "aeroplane");
    }
  }

  #[test]
  fn strong_detection_at_center_cell() {
    let config = Arc::new(DetectorConfig::default());
    let mut tensor = RawTensor::zeros(config.expected_shape());
    // 单元 (6, 6)，锚框 0：tx=ty=tw=th=0，目标性很高，类别 14 (person) 占优
    tensor.set(4, 6, 6, 12.0);
    tensor.set(5 + 14, 6, 6, 20.0);

    let detections = OutputDecoder::new(config.clone()).decode(&tensor).unwrap();
    let index = (6 * 13 + 6) * 5;
    let det = &detections[index];

    assert!(det.confidence > 0.99);
    assert_eq!(det.class_id, 14);
    assert_eq!(det.label, "person");

    let (cx, cy) = det.rect.center();
    assert!((cx - 208.0).abs() < 1e-3);
    assert!((cy - 208.0).abs() < 1e-3);
    assert!((det.rect.width - 1.08 * 32.0).abs() < 1e-3);
    assert!((det.rect.height - 1.19 * 32.0).abs() < 1e-3);

    let best = detections
      .iter()
      .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
      .unwrap();
    assert_eq!(best, det);
  }

  #[test]
  fn box_geometry_uses_strided_layout() {
    let config = small_config();
    let mut tensor = RawTensor::zeros(config.expected_shape());
    // 行 2, 列 1, 锚框 1，通道基址 1 * 8
    let base = 8;
    tensor.set(base, 2, 1, 1.5);
    tensor.set(base + 1, 2, 1, -0.5);
    tensor.set(base + 2, 2, 1, 0.25);
    tensor.set(base + 3, 2, 1, -0.75);
    tensor.set(base + 4, 2, 1, 3.0);
    tensor.set(base + 5 + 2, 2, 1, 4.0);

    let detections = OutputDecoder::new(config.clone()).decode(&tensor).unwrap();
    assert_eq!(detections.len(), 4 * 3 * 2);
    let det = &detections[(2 * 4 + 1) * 2 + 1];

    let (cell_w, cell_h) = (32.0, 32.0);
    let width = 0.25f32.exp() * 3.0 * cell_w;
    let height = (-0.75f32).exp() * 1.5 * cell_h;
    let cx = (1.0 + sigmoid(1.5)) * cell_w;
    let cy = (2.0 + sigmoid(-0.5)) * cell_h;

    assert!((det.rect.width - width).abs() < 1e-3);
    assert!((det.rect.height - height).abs() < 1e-3);
    assert!((det.rect.x - (cx - width / 2.0)).abs() < 1e-3);
    assert!((det.rect.y - (cy - height / 2.0)).abs() < 1e-3);

    let mut probs = [0.0, 0.0, 4.0];
    softmax_in_place(&mut probs);
    assert_eq!(det.class_id, 2);
    assert!((det.confidence - sigmoid(3.0) * probs[2]).abs() < 1e-6);
  }

  #[test]
  fn negative_origin_is_not_clamped() {
    let config = small_config();
    let mut tensor = RawTensor::zeros(config.expected_shape());
    // 列 0 的大框会越过左上边界
    tensor.set(2, 0, 0, 2.0);
    tensor.set(3, 0, 0, 2.0);

    let detections = OutputDecoder::new(config).decode(&tensor).unwrap();
    assert!(detections[0].rect.x < 0.0);
    assert!(detections[0].rect.y < 0.0);
  }

  #[test]
  fn rejects_mismatched_shape() {
    let config = small_config();
    let decoder = OutputDecoder::new(config);
    let err = decoder
      .decode(&RawTensor::zeros(TensorShape::new(16, 4, 4)))
      .unwrap_err();
    assert_eq!(
      err,
      DecodeError::ShapeMismatch {
        expected: TensorShape::new(16, 3, 4),
        actual: TensorShape::new(16, 4, 4),
      }
    );
  }

  #[test]
  fn rejects_truncated_buffer() {
    let config = small_config();
    let shape = config.expected_shape();
    let decoder = OutputDecoder::new(config);
    let err = decoder
      .decode(&RawTensor::new(vec![0.0; shape.len() - 1], shape))
      .unwrap_err();
    assert_eq!(
      err,
      DecodeError::LengthMismatch {
        expected: shape.len(),
        actual: shape.len() - 1,
      }
    );
  }

  #[test]
  fn softmax_degenerates_to_uniform_on_non_finite_scores() {
    let mut scores = [f32::NEG_INFINITY; 4];
    softmax_in_place(&mut scores);
    assert_eq!(scores, [0.25; 4]);

    let mut scores = [0.0, f32::INFINITY];
    softmax_in_place(&mut scores);
    assert_eq!(scores, [0.5; 2]);

    let mut scores = [1.0, f32::NAN, 2.0];
    softmax_in_place(&mut scores);
    assert!(scores.iter().all(|p| (*p - 1.0 / 3.0).abs() < 1e-6));

    // 单个 -inf 只是概率为零
    let mut scores = [0.0, f32::NEG_INFINITY];
    softmax_in_place(&mut scores);
    assert_eq!(scores, [1.0, 0.0]);
  }

  #[test]
  fn rejects_non_finite_tensor_values() {
    let config = Arc::new(DetectorConfig::default());
    let shape = config.expected_shape();
    let decoder = OutputDecoder::new(config);

    // 单元 (1, 1) 锚框 0 的全部类别得分为 -inf
    let mut tensor = RawTensor::zeros(shape);
    for k in 0..20 {
      tensor.set(5 + k, 1, 1, f32::NEG_INFINITY);
    }
    assert_eq!(
      decoder.decode(&tensor).unwrap_err(),
      DecodeError::NonFiniteValue {
        offset: shape.offset(5, 1, 1),
        value: f32::NEG_INFINITY,
      }
    );

    let mut tensor = RawTensor::zeros(shape);
    tensor.set(4, 0, 2, f32::NAN);
    assert!(matches!(
      decoder.decode(&tensor).unwrap_err(),
      DecodeError::NonFiniteValue { offset, .. } if offset == shape.offset(4, 0, 2)
    ));
  }

  #[test]
  fn rejects_overflowing_box_size() {
    let config = Arc::new(DetectorConfig::default());
    let mut tensor = RawTensor::zeros(config.expected_shape());
    tensor.set(25 + 2, 3, 4, 100.0); // 锚框 1 的 tw
    assert_eq!(
      OutputDecoder::new(config).decode(&tensor).unwrap_err(),
      DecodeError::BoxOverflow {
        row: 3,
        col: 4,
        anchor: 1,
      }
    );
  }

  proptest! {
    #[test]
    fn softmax_sums_to_one(mut scores in prop::collection::vec(-30.0f32..30.0, 1..40)) {
      softmax_in_place(&mut scores);
      let sum: f32 = scores.iter().sum();
      prop_assert!((sum - 1.0).abs() < 1e-4);
      prop_assert!(scores.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn decoded_candidates_are_well_formed(
      data in prop::collection::vec(-8.0f32..8.0, 3 * 4 * 16)
    ) {
      let config = small_config();
      let tensor = RawTensor::new(data, config.expected_shape());
      let detections = OutputDecoder::new(config).decode(&tensor).unwrap();
      prop_assert_eq!(detections.len(), 3 * 4 * 2);
      for det in &detections {
        prop_assert!((0.0..=1.0).contains(&det.confidence));
        prop_assert!(det.rect.width >= 0.0 && det.rect.height >= 0.0);
        prop_assert!(det.class_id < 3);
      }
    }
  }
}
