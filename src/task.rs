// 该文件是 Kanjian （看见） 项目的一部分。
// src/task.rs - 任务调度
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

use std::{sync::mpsc, thread, time::Duration};

use anyhow::Context;
use tracing::{info, warn};

use crate::{frame::FrameSource, model::DetectResult, model::Model, output::Render};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

fn log_detections(frame: &impl FrameSource, result: &DetectResult) {
  info!(
    "=====图像 {} 的检测结果=====",
    frame.source_path().display()
  );
  if result.is_empty() {
    info!("未检测到目标");
  }
  for item in result {
    info!("{} and its confidence score: {}", item.label, item.confidence);
  }
}

/// 处理单帧：推理、记录、渲染
fn process_frame<F, M, O>(frame: &F, model: &M, output: &O) -> anyhow::Result<()>
where
  F: FrameSource,
  M: Model<Input = F, Output = DetectResult>,
  M::Error: std::error::Error + Send + Sync + 'static,
  O: Render<F, DetectResult>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  let name = frame.source_path().display().to_string();

  let now = std::time::Instant::now();
  let result = model
    .infer(frame)
    .with_context(|| format!("推理失败: {}", name))?;
  info!("推理完成，耗时: {:.2?}", now.elapsed());

  log_detections(frame, &result);

  let now = std::time::Instant::now();
  output
    .render_result(frame, &result)
    .with_context(|| format!("渲染失败: {}", name))?;
  info!("渲染完成，耗时: {:.2?}", now.elapsed());

  Ok(())
}

/// 只处理第一帧
pub struct OneShotTask;

impl<F, I, M, O> Task<I, M, O> for OneShotTask
where
  F: FrameSource,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = DetectResult>,
  M::Error: std::error::Error + Send + Sync + 'static,
  O: Render<F, DetectResult>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    process_frame(&frame, &model, &output)
  }
}

/// 依次处理所有帧，可限制帧数，Ctrl-C 在当前帧结束后停止
#[derive(Default, Debug)]
pub struct BatchTask {
  frame_number: Option<usize>,
}

impl BatchTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number.filter(|n| *n > 0);
    self
  }
}

fn install_interrupt_handler() -> mpsc::Receiver<()> {
  let (tx, rx) = mpsc::channel();

  let installed = ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  });
  if let Err(e) = installed {
    warn!("无法设置 Ctrl-C 处理器: {}", e);
  }

  rx
}

impl<F, I, M, O> Task<I, M, O> for BatchTask
where
  F: FrameSource,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = DetectResult>,
  M::Error: std::error::Error + Send + Sync + 'static,
  O: Render<F, DetectResult>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let rx = install_interrupt_handler();

    let mut frame_index = 0;
    for frame in input {
      frame_index += 1;
      info!("处理第 {} 帧图像", frame_index);
      process_frame(&frame, &model, &output)?;

      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成，共处理 {} 帧", frame_index);
    Ok(())
  }
}
