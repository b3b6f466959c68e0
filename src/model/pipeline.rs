// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/pipeline.rs - 检测流水线
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

use std::{sync::Arc, time::Instant};

use thiserror::Error;
use tracing::debug;

use crate::model::{
  BoxSuppressor, DecodeError, DetectResult, DetectorConfig, Inference, Model, OutputDecoder,
  RawTensor, SuppressError,
};

#[derive(Error, Debug, PartialEq)]
pub enum DetectorError {
  #[error("解码错误: {0}")]
  DecodeError(#[from] DecodeError),
  #[error("参数错误: {0}")]
  SuppressError(#[from] SuppressError),
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("推理错误: {0}")]
  InferenceError(Box<dyn std::error::Error + Send + Sync>),
  #[error("{0}")]
  DetectorError(#[from] DetectorError),
}

/// 解码器与抑制器的组合，共享同一份配置
pub struct Detector {
  config: Arc<DetectorConfig>,
  decoder: OutputDecoder,
  suppressor: BoxSuppressor,
}

impl Detector {
  pub fn new(config: DetectorConfig) -> Self {
    Self::from_shared(Arc::new(config))
  }

  pub fn from_shared(config: Arc<DetectorConfig>) -> Self {
    Self {
      decoder: OutputDecoder::new(config.clone()),
      suppressor: BoxSuppressor::new(config.clone()),
      config,
    }
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  /// 使用配置中的默认阈值与结果上限
  pub fn detect(&self, tensor: &RawTensor) -> Result<DetectResult, DetectorError> {
    self.detect_with(
      tensor,
      self.config.max_results(),
      self.config.confidence_threshold(),
    )
  }

  pub fn detect_with(
    &self,
    tensor: &RawTensor,
    max_results: usize,
    confidence_threshold: f32,
  ) -> Result<DetectResult, DetectorError> {
    BoxSuppressor::check_params(max_results, confidence_threshold)?;
    self.detect_checked(tensor, max_results, confidence_threshold)
  }

  /// 参数已校验，只剩解码可能失败
  fn detect_checked(
    &self,
    tensor: &RawTensor,
    max_results: usize,
    confidence_threshold: f32,
  ) -> Result<DetectResult, DetectorError> {
    let candidates = self.decoder.decode(tensor)?;
    let items = self
      .suppressor
      .select(candidates, max_results, confidence_threshold);
    Ok(DetectResult::new(
      items,
      self.config.input_width(),
      self.config.input_height(),
    ))
  }
}

/// 推理 → 解码 → 抑制
///
/// 阈值与结果上限在构造时校验，之后每帧不再重复检查。
pub struct DetectionPipeline<E> {
  inference: E,
  detector: Detector,
  max_results: usize,
  confidence_threshold: f32,
}

impl<E> DetectionPipeline<E> {
  pub fn new(inference: E, detector: Detector) -> Self {
    let max_results = detector.config().max_results();
    let confidence_threshold = detector.config().confidence_threshold();
    Self {
      inference,
      detector,
      max_results,
      confidence_threshold,
    }
  }

  pub fn with_max_results(mut self, max_results: usize) -> Result<Self, SuppressError> {
    BoxSuppressor::check_params(max_results, self.confidence_threshold)?;
    self.max_results = max_results;
    Ok(self)
  }

  pub fn with_confidence_threshold(
    mut self,
    confidence_threshold: f32,
  ) -> Result<Self, SuppressError> {
    BoxSuppressor::check_params(self.max_results, confidence_threshold)?;
    self.confidence_threshold = confidence_threshold;
    Ok(self)
  }

  pub fn detector(&self) -> &Detector {
    &self.detector
  }
}

impl<E> Model for DetectionPipeline<E>
where
  E: Inference,
  E::Error: std::error::Error + Send + Sync + 'static,
{
  type Input = E::Input;
  type Output = DetectResult;
  type Error = PipelineError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let now = Instant::now();
    let tensor = self
      .inference
      .run(input)
      .map_err(|e| PipelineError::InferenceError(Box::new(e)))?;
    debug!("获取张量 {}，耗时: {:.2?}", tensor.shape(), now.elapsed());

    let now = Instant::now();
    let result = self
      .detector
      .detect_checked(&tensor, self.max_results, self.confidence_threshold)?;
    debug!(
      "后处理完成，保留 {} 个检测框，耗时: {:.2?}",
      result.len(),
      now.elapsed()
    );

    Ok(result)
  }
}
