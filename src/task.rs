// 该文件是 Qiepian （切片检测） 项目的一部分。
// src/task.rs - 检测任务
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

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::{model::Model, output::Render};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 只处理输入的第一帧
pub struct OneShotTask;

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;

    let started = Instant::now();
    let result = model.infer(&frame)?;
    let infer_time = started.elapsed();
    output.render_result(&frame, &result)?;
    info!(
      "单帧任务完成，推理 {:.2?}，输出 {:.2?}",
      infer_time,
      started.elapsed() - infer_time
    );

    Ok(())
  }
}

/// 依次处理输入的所有帧，可限制帧数，收到 Ctrl-C 后在当前帧结束时退出
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

// 注册中断处理，进程内只能注册一次，失败时任务照常运行但无法被中断
fn interrupt_channel() -> mpsc::Receiver<()> {
  let (tx, rx) = mpsc::channel();

  let registered = ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  });
  if let Err(e) = registered {
    warn!("无法注册 Ctrl-C 处理: {}", e);
  }

  rx
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for ContinuousTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    let interrupted = interrupt_channel();
    let limit = self.frame_number.unwrap_or(usize::MAX);

    let mut processed = 0usize;
    for frame in input.take(limit) {
      let started = Instant::now();
      let result = model.infer(&frame)?;
      let infer_time = started.elapsed();
      output.render_result(&frame, &result)?;
      processed += 1;
      debug!(
        "第 {} 帧: 推理 {:.2?}，输出 {:.2?}",
        processed,
        infer_time,
        started.elapsed() - infer_time
      );

      if interrupted.try_recv().is_ok() {
        warn!("收到中断信号，停止处理后续帧");
        break;
      }
    }

    info!("连续任务结束，共处理 {} 帧", processed);
    Ok(())
  }
}
