// 该文件是 Kanjian （看见） 项目的一部分。
// src/main.rs - 项目主程序
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

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use url::Url;

use kanjian::{
  FromUrl, decode_url_path,
  frame::ImageFrame,
  input::InputWrapper,
  model::{
    DetectionPipeline, Detector, DetectorConfig, TensorFileBuilder, TensorFileInference,
  },
  output::OutputWrapper,
  task::{BatchTask, OneShotTask, Task},
};

/// Kanjian 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入来源（image:///path/to.jpg 或 folder:///path/to/dir）
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 网络输出张量（tensor:///path/to.bin 或 tensor:///path/to/dir）
  #[arg(long, value_name = "TENSOR")]
  pub tensor: Url,
  /// 输出路径（image:///dir/ 或 folder:///dir?record），默认写入输入目录下的 output/
  ///
  /// 追加 ?font=/path/to.ttf 指定标签字体；未指定时使用系统字体，找不到则只绘制背景条
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,
  /// 检测器配置文件（JSON），默认使用 Tiny YOLOv2 VOC
  #[arg(long, value_name = "FILE")]
  pub profile: Option<PathBuf>,
  /// 置信度阈值
  #[arg(long, default_value_t = 0.5)]
  pub confidence: f32,
  /// 最多保留的检测框数量
  #[arg(long, default_value_t = 5)]
  pub max_results: usize,
  /// 非极大值抑制的 IOU 阈值，覆盖配置文件中的值
  #[arg(long)]
  pub iou_threshold: Option<f32>,
  /// 最多处理的帧数，0 表示不限制
  #[arg(long, default_value_t = 0)]
  pub max_frames: usize,
}

fn load_config(args: &Args) -> Result<DetectorConfig> {
  let config = match &args.profile {
    Some(path) => DetectorConfig::from_file(path)
      .with_context(|| format!("无法加载检测器配置: {}", path.display()))?,
    None => DetectorConfig::default(),
  };

  match args.iou_threshold {
    Some(threshold) => Ok(config.into_builder().iou_threshold(threshold).build()?),
    None => Ok(config),
  }
}

/// 图像输入写到其所在目录的 output/，目录输入写到该目录的 output/
fn default_output(input: &Url) -> Result<Url> {
  let decoded = decode_url_path(input);
  let path = Path::new(&decoded);
  let base = if input.scheme() == "folder" {
    path
  } else {
    path.parent().unwrap_or(Path::new("/"))
  };
  let output = format!("image://{}/", base.join("output").display());
  Url::parse(&output).with_context(|| format!("无法构造默认输出路径: {}", output))
}

type TensorModel = DetectionPipeline<TensorFileInference<ImageFrame>>;

/// 在打开任何输入之前构造并校验检测流水线
fn build_model(args: &Args, config: DetectorConfig) -> Result<TensorModel> {
  let inference =
    TensorFileBuilder::from_url(&args.tensor)?.build::<ImageFrame>(config.expected_shape());
  DetectionPipeline::new(inference, Detector::new(config))
    .with_max_results(args.max_results)
    .and_then(|p| p.with_confidence_threshold(args.confidence))
    .context("检测参数无效")
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let output_url = match &args.output {
    Some(url) => url.clone(),
    None => default_output(&args.input)?,
  };

  info!("输入来源: {}", args.input);
  info!("张量来源: {}", args.tensor);
  info!("输出路径: {}", output_url);

  let config = load_config(&args)?;
  info!(
    "检测器: {}x{} 网格, {} 个锚框, {} 个类别, IOU 阈值 {}",
    config.grid_width(),
    config.grid_height(),
    config.anchor_count(),
    config.class_count(),
    config.iou_threshold()
  );

  let model = build_model(&args, config)?;

  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&output_url)?;

  if input.is_batch() {
    BatchTask::default()
      .with_frame_number(Some(args.max_frames))
      .run_task(input, model, output)?;
  } else {
    OneShotTask.run_task(input, model, output)?;
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_output_sits_next_to_input() {
    let url = Url::parse("image:///data/photos/dog.jpg").unwrap();
    assert_eq!(
      default_output(&url).unwrap().as_str(),
      "image:///data/photos/output/"
    );

    let url = Url::parse("folder:///data/photos").unwrap();
    assert_eq!(
      default_output(&url).unwrap().as_str(),
      "image:///data/photos/output/"
    );

    let url = Url::parse("image:///data/my photos/dog.jpg").unwrap();
    let output = default_output(&url).unwrap();
    assert_eq!(output.as_str(), "image:///data/my%20photos/output/");
    assert_eq!(decode_url_path(&output), "/data/my photos/output/");
  }

  #[test]
  fn iou_override_replaces_profile_value() {
    let args = Args::parse_from([
      "kanjian",
      "--input",
      "image:///a.jpg",
      "--tensor",
      "tensor:///a.bin",
      "--iou-threshold",
      "0.3",
    ]);
    assert_eq!(load_config(&args).unwrap().iou_threshold(), 0.3);
    assert_eq!(args.confidence, 0.5);
    assert_eq!(args.max_results, 5);

    let args = Args::parse_from([
      "kanjian",
      "--input",
      "image:///a.jpg",
      "--tensor",
      "tensor:///a.bin",
      "--iou-threshold",
      "1.5",
    ]);
    assert!(load_config(&args).is_err());
  }

  #[test]
  fn invalid_detection_parameters_fail_at_startup() {
    let parse = |extra: &[&str]| {
      let mut argv = vec![
        "kanjian",
        "--input",
        "image:///a.jpg",
        "--tensor",
        "tensor:///a.bin",
      ];
      argv.extend_from_slice(extra);
      Args::parse_from(argv)
    };

    assert!(build_model(&parse(&[]), DetectorConfig::default()).is_ok());
    assert!(build_model(&parse(&["--confidence", "1.5"]), DetectorConfig::default()).is_err());
    assert!(build_model(&parse(&["--max-results", "0"]), DetectorConfig::default()).is_err());
  }
}
