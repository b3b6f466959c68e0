// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/suppress.rs - 按类别的非极大值抑制
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
use tracing::debug;

use crate::{
  geometry::{Detection, Rect},
  model::config::{DetectorConfig, is_unit_interval},
};

#[derive(Error, Debug, PartialEq)]
pub enum SuppressError {
  #[error("最大结果数必须至少为 1，实际为 {0}")]
  InvalidMaxResults(usize),
  #[error("置信度阈值必须位于 [0, 1]，实际为 {0}")]
  InvalidConfidenceThreshold(f32),
}

/// 贪心的、按类别区分的非极大值抑制
///
/// 只有类别相同且 IOU 不低于阈值的候选才会互相抑制。IOU 在裁剪到输入范围
/// 之后的矩形上计算。
pub struct BoxSuppressor {
  config: Arc<DetectorConfig>,
}

impl BoxSuppressor {
  pub fn new(config: Arc<DetectorConfig>) -> Self {
    Self { config }
  }

  pub fn iou_threshold(&self) -> f32 {
    self.config.iou_threshold()
  }

  fn clamped(&self, rect: &Rect) -> Rect {
    rect.clamp_to(self.config.input_width(), self.config.input_height())
  }

  /// 在任何计算开始前校验调用参数
  pub fn check_params(max_results: usize, confidence_threshold: f32) -> Result<(), SuppressError> {
    if max_results < 1 {
      return Err(SuppressError::InvalidMaxResults(max_results));
    }
    if !is_unit_interval(confidence_threshold) {
      return Err(SuppressError::InvalidConfidenceThreshold(
        confidence_threshold,
      ));
    }
    Ok(())
  }

  /// 过滤候选框，结果按置信度降序，长度不超过 `max_results`
  pub fn filter(
    &self,
    candidates: Vec<Detection>,
    max_results: usize,
    confidence_threshold: f32,
  ) -> Result<Vec<Detection>, SuppressError> {
    Self::check_params(max_results, confidence_threshold)?;
    Ok(self.select(candidates, max_results, confidence_threshold))
  }

  /// 参数已由 `check_params` 校验过的过滤
  pub(crate) fn select(
    &self,
    candidates: Vec<Detection>,
    max_results: usize,
    confidence_threshold: f32,
  ) -> Vec<Detection> {
    let total = candidates.len();
    // NaN 的比较结果为 false，同样被丢弃
    let mut pool: Vec<(Rect, Detection)> = candidates
      .into_iter()
      .filter(|det| det.confidence >= confidence_threshold)
      .map(|det| (self.clamped(&det.rect), det))
      .collect();
    // 稳定排序，置信度相同时保持生成顺序
    pool.sort_by(|(_, a), (_, b)| b.confidence.total_cmp(&a.confidence));

    debug!(
      "阈值 {} 过滤后剩余 {}/{} 个候选框",
      confidence_threshold,
      pool.len(),
      total
    );

    let iou_threshold = self.iou_threshold();
    let mut active = vec![true; pool.len()];
    let mut results = Vec::with_capacity(max_results.min(pool.len()));

    for i in 0..pool.len() {
      if results.len() >= max_results {
        break;
      }
      if !active[i] {
        continue;
      }

      let (selected_rect, selected) = &pool[i];
      for j in (i + 1)..pool.len() {
        if !active[j] {
          continue;
        }
        let (rect, det) = &pool[j];
        if det.class_id == selected.class_id && selected_rect.iou(rect) >= iou_threshold {
          active[j] = false;
        }
      }
      results.push(selected.clone());
    }

    debug!("非极大值抑制后保留 {} 个检测框", results.len());
    results
  }
}
