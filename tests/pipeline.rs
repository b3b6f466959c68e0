// 该文件是 Kanjian （看见） 项目的一部分。
// tests/pipeline.rs - 端到端检测流程测试
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

#![cfg(all(feature = "read_image_file", feature = "save_image_file"))]

use std::path::Path;

use image::{Rgb, RgbImage};
use kanjian::{
  FromUrl,
  frame::ImageFrame,
  input::InputWrapper,
  model::{
    DetectionPipeline, Detector, DetectorConfig, Model, PipelineError, RawTensor,
    TensorFileBuilder,
  },
  output::{OutputWrapper, Render},
  task::{BatchTask, OneShotTask, Task},
};
use url::Url;

/// 在 (row, col) 单元的 anchor 上放置一个高置信度目标
fn plant(
  tensor: &mut RawTensor,
  config: &DetectorConfig,
  (row, col): (usize, usize),
  anchor: usize,
  class: usize,
  objectness: f32,
) {
  let base = anchor * config.box_stride();
  tensor.set(base + 4, row, col, objectness);
  tensor.set(base + 5 + class, row, col, 20.0);
}

fn write_tensor(path: &Path, tensor: &RawTensor) {
  let bytes: Vec<u8> = tensor
    .data()
    .iter()
    .flat_map(|v| v.to_le_bytes())
    .collect();
  std::fs::write(path, bytes).unwrap();
}

fn write_image(path: &Path) {
  RgbImage::from_pixel(832, 832, Rgb([40, 40, 40]))
    .save(path)
    .unwrap();
}

#[test]
fn tensor_dump_yields_ranked_detections() {
  let dir = tempfile::tempdir().unwrap();
  let config = DetectorConfig::default();

  let mut tensor = RawTensor::zeros(config.expected_shape());
  plant(&mut tensor, &config, (6, 6), 2, 11, 12.0); // dog
  plant(&mut tensor, &config, (1, 10), 0, 14, 10.0); // person
  write_tensor(&dir.path().join("frame.bin"), &tensor);

  let inference = TensorFileBuilder::new(dir.path().join("frame.bin"))
    .build::<ImageFrame>(config.expected_shape());
  let pipeline = DetectionPipeline::new(inference, Detector::new(config))
    .with_max_results(5)
    .and_then(|p| p.with_confidence_threshold(0.5))
    .unwrap();

  let frame = ImageFrame::new("/any/frame.png", RgbImage::new(4, 4));
  let result = pipeline.infer(&frame).unwrap();

  let labels: Vec<_> = result.iter().map(|d| d.label.as_str()).collect();
  assert_eq!(labels, vec!["dog", "person"]);
  assert!(result.items[0].confidence >= result.items[1].confidence);

  let dog = &result.items[0].rect;
  assert!((dog.center().0 - 208.0).abs() < 1e-3);
  assert!((dog.center().1 - 208.0).abs() < 1e-3);
  assert_eq!((result.input_width, result.input_height), (416.0, 416.0));
}

#[test]
fn ragged_tensor_dump_is_an_inference_error() {
  let dir = tempfile::tempdir().unwrap();
  std::fs::write(dir.path().join("frame.bin"), [0u8; 7]).unwrap();

  let config = DetectorConfig::default();
  let inference = TensorFileBuilder::new(dir.path().join("frame.bin"))
    .build::<ImageFrame>(config.expected_shape());
  let pipeline = DetectionPipeline::new(inference, Detector::new(config));

  let frame = ImageFrame::new("/any/frame.png", RgbImage::new(4, 4));
  assert!(matches!(
    pipeline.infer(&frame),
    Err(PipelineError::InferenceError(_))
  ));
}

#[test]
fn single_image_is_rendered_to_output_directory() {
  let dir = tempfile::tempdir().unwrap();
  let config = DetectorConfig::default();

  let mut tensor = RawTensor::zeros(config.expected_shape());
  plant(&mut tensor, &config, (6, 6), 2, 8, 10.0); // chair
  write_tensor(&dir.path().join("tensor.bin"), &tensor);
  write_image(&dir.path().join("room.png"));

  let url = Url::parse(&format!("image://{}/room.png", dir.path().display())).unwrap();
  let input = InputWrapper::from_url(&url).unwrap();
  let inference = TensorFileBuilder::from_url(
    &Url::parse(&format!("tensor://{}/tensor.bin", dir.path().display())).unwrap(),
  )
  .unwrap()
  .build::<ImageFrame>(config.expected_shape());
  let url = Url::parse(&format!("image://{}/output/", dir.path().display())).unwrap();
  let output = OutputWrapper::from_url(&url).unwrap();

  OneShotTask
    .run_task(
      input,
      DetectionPipeline::new(inference, Detector::new(config)),
      output,
    )
    .unwrap();

  let rendered = image::open(dir.path().join("output/room.png"))
    .unwrap()
    .to_rgb8();
  assert_eq!(rendered.dimensions(), (832, 832));
  // 检测框中心附近的像素保持原样，框边上出现类别颜色
  assert_eq!(rendered.get_pixel(416, 416), &Rgb([40, 40, 40]));
  assert!(rendered.pixels().any(|p| *p == Rgb([255, 0, 0])));
}

#[test]
fn folder_input_looks_up_tensor_per_frame() {
  let dir = tempfile::tempdir().unwrap();
  let images = dir.path().join("images");
  let tensors = dir.path().join("tensors");
  std::fs::create_dir_all(&images).unwrap();
  std::fs::create_dir_all(&tensors).unwrap();

  let config = DetectorConfig::default();
  for (name, class) in [("a", 11), ("b", 7)] {
    let mut tensor = RawTensor::zeros(config.expected_shape());
    plant(&mut tensor, &config, (3, 3), 1, class, 10.0);
    write_tensor(&tensors.join(format!("{name}.bin")), &tensor);
    write_image(&images.join(format!("{name}.png")));
  }
  std::fs::write(images.join("notes.md"), "# not an image").unwrap();

  let url = Url::parse(&format!("folder://{}", images.display())).unwrap();
  let input = InputWrapper::from_url(&url).unwrap();
  assert!(input.is_batch());

  let inference = TensorFileBuilder::from_url(
    &Url::parse(&format!("tensor://{}", tensors.display())).unwrap(),
  )
  .unwrap()
  .build::<ImageFrame>(config.expected_shape());
  let pipeline = DetectionPipeline::new(inference, Detector::new(config));

  struct Collect(std::cell::RefCell<Vec<String>>);
  impl Render<ImageFrame, kanjian::model::DetectResult> for &Collect {
    type Error = std::convert::Infallible;

    fn render_result(
      &self,
      _frame: &ImageFrame,
      result: &kanjian::model::DetectResult,
    ) -> Result<(), Self::Error> {
      self
        .0
        .borrow_mut()
        .extend(result.iter().map(|d| d.label.clone()));
      Ok(())
    }
  }

  let collected = Collect(Default::default());
  BatchTask::default()
    .run_task(input, pipeline, &collected)
    .unwrap();
  assert_eq!(*collected.0.borrow(), vec!["dog", "cat"]);
}
