// 该文件是 Xunfeng （巡蜂） 项目的一部分。
// src/task.rs - 任务驱动
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  sync::mpsc,
  thread,
  time::{Duration, Instant},
};

use anyhow::Context;
use tracing::{info, warn};

use crate::{
  frame::{FrameError, RgbFrame},
  output::Render,
  pipeline::{DetectionPipeline, FrameOutcome, PipelineStats},
  worker::{BoardReader, DecodeWorker, DetectionBoard, Published, WorkerError},
};

pub trait Task<I, O>: Sized {
  type Error;
  fn run_task(self, input: I, pipeline: DetectionPipeline, output: O)
  -> Result<TaskSummary, Self::Error>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TaskSummary {
  pub stats: PipelineStats,
  pub frames_read: u64,
  /// 被新帧覆盖而未处理的帧
  pub frames_dropped: u64,
  pub snapshots_rendered: u64,
}

pub struct OneShotTask;

impl<
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Result<RgbFrame, FrameError>>,
  O: Render<Published, Error = RE>,
> Task<I, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    mut input: I,
    mut pipeline: DetectionPipeline,
    output: O,
  ) -> Result<TaskSummary, Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let now = Instant::now();
    let report = match pipeline.process(frame, now) {
      FrameOutcome::Processed(report) => report,
      FrameOutcome::Skipped(reason) => anyhow::bail!("第一帧无法处理: {:?}", reason),
    };
    let elapsed = now.elapsed();
    info!("推理完成，耗时: {:.2?}", elapsed);

    let published = Published {
      version: 1,
      frame_index: report.frame_index,
      state: report.stabilized.state,
      detections: report.stabilized.items,
      model_available: pipeline.is_available(),
    };
    output.render_result(&published)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(TaskSummary {
      stats: pipeline.stats(),
      frames_read: 1,
      frames_dropped: 0,
      snapshots_rendered: 1,
    })
  }
}

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

/// 渲染尚未渲染过的最新快照
fn render_latest<O: Render<Published>>(
  reader: &BoardReader,
  output: &O,
  last_version: &mut u64,
) -> anyhow::Result<bool>
where
  O::Error: std::error::Error + Sync + Send + 'static,
{
  if reader.version()? <= *last_version {
    return Ok(false);
  }
  let snapshot = reader.snapshot()?;
  *last_version = snapshot.version;
  output.render_result(&snapshot)?;
  Ok(true)
}

impl<
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Result<RgbFrame, FrameError>>,
  O: Render<Published, Error = RE>,
> Task<I, O> for ContinuousTask
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    input: I,
    pipeline: DetectionPipeline,
    output: O,
  ) -> Result<TaskSummary, Self::Error> {
    info!("开始任务...");
    let interrupt = install_interrupt_handler();

    let board = DetectionBoard::new(pipeline.is_available());
    let reader = board.reader();
    let (sender, worker) =
      DecodeWorker::spawn(pipeline, board).context("启动解码线程失败")?;

    let mut frames_read = 0u64;
    let mut snapshots_rendered = 0u64;
    let mut last_version = 0u64;
    for frame in input {
      frames_read += 1;
      match sender.publish(frame) {
        Ok(_) => {}
        Err(WorkerError::Disconnected) => {
          warn!("解码线程已退出，停止读取输入");
          break;
        }
        Err(e) => return Err(e.into()),
      }

      if render_latest(&reader, &output, &mut last_version)? {
        snapshots_rendered += 1;
      }

      if self
        .frame_number
        .is_some_and(|n| frames_read >= n as u64)
      {
        info!("达到指定帧数 {}, 退出任务循环", frames_read);
        break;
      }
      if interrupt.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    let frames_dropped = sender.dropped();
    drop(sender);
    let pipeline = worker.join().context("等待解码线程退出失败")?;
    if render_latest(&reader, &output, &mut last_version)? {
      snapshots_rendered += 1;
    }

    let stats = pipeline.stats();
    info!(
      "任务完成: 读取 {} 帧, 处理 {} 帧, 跳过 {} 帧, 覆盖丢弃 {} 帧, 推理失败 {} 次, 异常张量 {} 个",
      frames_read,
      stats.frames_processed,
      stats.frames_skipped,
      frames_dropped,
      stats.inference_failures,
      stats.degenerate_tensors
    );

    Ok(TaskSummary {
      stats,
      frames_read,
      frames_dropped,
      snapshots_rendered,
    })
  }
}
