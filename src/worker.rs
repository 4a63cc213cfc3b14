// 该文件是 Xunfeng （巡蜂） 项目的一部分。
// src/worker.rs - 解码工作线程与帧交接
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  sync::{
    Arc, RwLock,
    atomic::{AtomicBool, AtomicU64, Ordering},
  },
  thread::{self, JoinHandle},
  time::Instant,
};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  frame::{FrameError, RgbFrame},
  model::DetectItem,
  pipeline::{DetectionPipeline, FrameOutcome},
  stabilizer::{Stabilized, StabilizerState},
};

const WORKER_THREAD_NAME: &str = "xunfeng-decode";

#[derive(Error, Debug)]
pub enum WorkerError {
  #[error("发布的检测结果锁已损坏")]
  Poisoned,
  #[error("解码线程已退出")]
  Disconnected,
  #[error("无法启动解码线程: {0}")]
  Spawn(#[from] std::io::Error),
  #[error("解码线程异常退出")]
  Panicked,
}

/// 帧交接的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
  /// 槽位为空，直接放入
  Queued,
  /// 替换了尚未处理的旧帧
  Replaced,
}

/// 单槽位的生产端，新值总是覆盖尚未被取走的旧值，从不阻塞
pub struct FrameSender<T> {
  tx: Sender<T>,
  evict: Receiver<T>,
  dropped: Arc<AtomicU64>,
  closed: Arc<AtomicBool>,
}

pub struct FrameReceiver<T> {
  rx: Receiver<T>,
  closed: Arc<AtomicBool>,
}

pub fn latest_slot<T>() -> (FrameSender<T>, FrameReceiver<T>) {
  let (tx, rx) = crossbeam_channel::bounded(1);
  let closed = Arc::new(AtomicBool::new(false));
  let sender = FrameSender {
    tx,
    evict: rx.clone(),
    dropped: Arc::new(AtomicU64::new(0)),
    closed: closed.clone(),
  };
  (sender, FrameReceiver { rx, closed })
}

impl<T> FrameSender<T> {
  pub fn publish(&self, value: T) -> Result<Handoff, WorkerError> {
    let mut value = value;
    let mut handoff = Handoff::Queued;
    loop {
      if self.closed.load(Ordering::Acquire) {
        return Err(WorkerError::Disconnected);
      }
      match self.tx.try_send(value) {
        // 发送期间接收端可能已关闭，值留在槽中也无人读取
        Ok(()) if self.closed.load(Ordering::Acquire) => return Err(WorkerError::Disconnected),
        Ok(()) => return Ok(handoff),
        Err(TrySendError::Disconnected(_)) => return Err(WorkerError::Disconnected),
        Err(TrySendError::Full(back)) => {
          value = back;
          // 取走旧值后重试，期间工作线程可能已经先取走
          match self.evict.try_recv() {
            Ok(_) => {
              self.dropped.fetch_add(1, Ordering::Relaxed);
              handoff = Handoff::Replaced;
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => return Err(WorkerError::Disconnected),
          }
        }
      }
    }
  }

  /// 被覆盖丢弃的帧数
  pub fn dropped(&self) -> u64 {
    self.dropped.load(Ordering::Relaxed)
  }
}

impl<T> FrameReceiver<T> {
  /// 阻塞等待下一个值，生产端关闭后返回 `None`
  pub fn recv(&self) -> Option<T> {
    self.rx.recv().ok()
  }
}

impl<T> Drop for FrameReceiver<T> {
  fn drop(&mut self) {
    self.closed.store(true, Ordering::Release);
  }
}

/// 对外发布的检测结果快照
#[derive(Debug, Clone, Default, Serialize)]
pub struct Published {
  /// 每次发布递增，0 表示尚未发布
  pub version: u64,
  pub frame_index: u64,
  pub state: StabilizerState,
  pub detections: Arc<[DetectItem]>,
  pub model_available: bool,
}

/// 检测结果发布板的唯一写端
pub struct DetectionBoard {
  inner: Arc<RwLock<Published>>,
}

/// 检测结果发布板的读端，可任意克隆
#[derive(Clone)]
pub struct BoardReader {
  inner: Arc<RwLock<Published>>,
}

impl DetectionBoard {
  pub fn new(model_available: bool) -> Self {
    Self {
      inner: Arc::new(RwLock::new(Published {
        model_available,
        ..Published::default()
      })),
    }
  }

  pub fn reader(&self) -> BoardReader {
    BoardReader {
      inner: self.inner.clone(),
    }
  }

  pub fn publish(&mut self, frame_index: u64, stabilized: Stabilized) -> Result<u64, WorkerError> {
    let mut published = self.inner.write().map_err(|_| WorkerError::Poisoned)?;
    published.version += 1;
    published.frame_index = frame_index;
    published.state = stabilized.state;
    published.detections = stabilized.items;
    Ok(published.version)
  }

  pub fn snapshot(&self) -> Result<Published, WorkerError> {
    snapshot(&self.inner)
  }
}

impl BoardReader {
  pub fn snapshot(&self) -> Result<Published, WorkerError> {
    snapshot(&self.inner)
  }

  pub fn version(&self) -> Result<u64, WorkerError> {
    Ok(self.inner.read().map_err(|_| WorkerError::Poisoned)?.version)
  }
}

fn snapshot(inner: &RwLock<Published>) -> Result<Published, WorkerError> {
  inner
    .read()
    .map(|published| published.clone())
    .map_err(|_| WorkerError::Poisoned)
}

pub type FrameInput = Result<RgbFrame, FrameError>;

/// 唯一的解码工作线程
///
/// 逐帧顺序处理，上一帧推理和解码完成之前不会开始下一帧。
pub struct DecodeWorker {
  handle: JoinHandle<DetectionPipeline>,
}

impl DecodeWorker {
  pub fn spawn(
    pipeline: DetectionPipeline,
    board: DetectionBoard,
  ) -> Result<(FrameSender<FrameInput>, DecodeWorker), WorkerError> {
    let (sender, receiver) = latest_slot::<FrameInput>();
    let handle = thread::Builder::new()
      .name(WORKER_THREAD_NAME.to_string())
      .spawn(move || run_worker(pipeline, board, receiver))?;
    Ok((sender, DecodeWorker { handle }))
  }

  /// 等待工作线程结束并取回流水线上下文
  pub fn join(self) -> Result<DetectionPipeline, WorkerError> {
    self.handle.join().map_err(|_| WorkerError::Panicked)
  }
}

fn run_worker(
  mut pipeline: DetectionPipeline,
  mut board: DetectionBoard,
  receiver: FrameReceiver<FrameInput>,
) -> DetectionPipeline {
  info!("解码线程启动");
  while let Some(frame) = receiver.recv() {
    match pipeline.process(frame, Instant::now()) {
      FrameOutcome::Processed(report) => {
        match board.publish(report.frame_index, report.stabilized) {
          Ok(version) => debug!("发布第 {} 帧结果, 版本 {}", report.frame_index, version),
          Err(e) => {
            error!("发布检测结果失败: {}", e);
            break;
          }
        }
      }
      FrameOutcome::Skipped(reason) => debug!("跳过帧: {:?}", reason),
    }
  }
  info!("解码线程退出");
  pipeline
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::BBox;

  #[test]
  fn newest_value_replaces_pending() {
    let (tx, rx) = latest_slot::<u32>();
    assert_eq!(tx.publish(1).unwrap(), Handoff::Queued);
    assert_eq!(tx.publish(2).unwrap(), Handoff::Replaced);
    assert_eq!(tx.publish(3).unwrap(), Handoff::Replaced);
    assert_eq!(tx.dropped(), 2);
    assert_eq!(rx.recv(), Some(3));
    assert_eq!(tx.publish(4).unwrap(), Handoff::Queued);
    assert_eq!(rx.recv(), Some(4));
  }

  #[test]
  fn receiver_sees_end_after_sender_drop() {
    let (tx, rx) = latest_slot::<u32>();
    tx.publish(7).unwrap();
    drop(tx);
    assert_eq!(rx.recv(), Some(7));
    assert_eq!(rx.recv(), None);
  }

  #[test]
  fn publishing_after_receiver_drop_fails() {
    let (tx, rx) = latest_slot::<u32>();
    drop(rx);
    assert!(matches!(tx.publish(1), Err(WorkerError::Disconnected)));
  }

  #[test]
  fn no_frame_is_queued_once_receiver_is_gone() {
    let (tx, rx) = latest_slot::<u32>();
    let gone = Arc::new(AtomicBool::new(false));
    let consumer = {
      let gone = gone.clone();
      thread::spawn(move || {
        for _ in 0..5 {
          if rx.recv().is_none() {
            break;
          }
        }
        drop(rx);
        gone.store(true, Ordering::Release);
      })
    };

    let mut accepted = 0u32;
    for i in 0u32.. {
      let was_gone = gone.load(Ordering::Acquire);
      match tx.publish(i) {
        Ok(_) => {
          assert!(!was_gone, "frame {i} accepted after receiver closed");
          accepted += 1;
        }
        Err(WorkerError::Disconnected) => break,
        Err(e) => panic!("unexpected error {e:?}"),
      }
    }
    consumer.join().unwrap();
    assert!(accepted >= 1);
    assert!(matches!(tx.publish(0), Err(WorkerError::Disconnected)));
  }

  #[test]
  fn board_readers_see_latest_publication() {
    let mut board = DetectionBoard::new(true);
    let reader = board.reader();
    assert_eq!(reader.version().unwrap(), 0);

    let items: Arc<[DetectItem]> = vec![DetectItem {
      label: "object".to_string(),
      score: 0.9,
      bbox: BBox::new(0.1, 0.1, 0.2, 0.2),
    }]
    .into();
    let version = board
      .publish(
        5,
        Stabilized {
          state: StabilizerState::Fresh,
          items,
        },
      )
      .unwrap();
    assert_eq!(version, 1);

    let snapshot = reader.clone().snapshot().unwrap();
    assert_eq!(snapshot.version, 1);
    assert_eq!(snapshot.frame_index, 5);
    assert_eq!(snapshot.state, StabilizerState::Fresh);
    assert_eq!(snapshot.detections.len(), 1);
    assert!(snapshot.model_available);
  }
}
