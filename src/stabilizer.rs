// 该文件是 Xunfeng （巡蜂） 项目的一部分。
// src/stabilizer.rs - 检测结果时间稳定
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  sync::Arc,
  time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

use crate::model::DetectItem;

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StabilizerState {
  /// 当前帧有检测结果
  Fresh,
  /// 当前帧为空，沿用宽限期内上一次的结果
  Held,
  /// 近期没有检测结果
  #[default]
  Empty,
}

#[derive(Debug, Clone, Default)]
pub struct Stabilized {
  pub state: StabilizerState,
  pub items: Arc<[DetectItem]>,
}

/// 时间稳定器
///
/// 保存最近一次非空结果及其时间戳。空帧在宽限期内输出保存的结果，
/// 超过宽限期后输出空列表。这不是目标跟踪，保持的框就是上一次的原始框。
#[derive(Debug)]
pub struct TemporalStabilizer {
  grace_period: Duration,
  // 结果和时间戳必须成对更新
  last: Option<(Arc<[DetectItem]>, Instant)>,
}

impl Default for TemporalStabilizer {
  fn default() -> Self {
    Self::new(DEFAULT_GRACE_PERIOD)
  }
}

impl TemporalStabilizer {
  pub fn new(grace_period: Duration) -> Self {
    Self {
      grace_period,
      last: None,
    }
  }

  pub fn grace_period(&self) -> Duration {
    self.grace_period
  }

  pub fn last_detection_at(&self) -> Option<Instant> {
    self.last.as_ref().map(|(_, at)| *at)
  }

  pub fn update(&mut self, items: Vec<DetectItem>, now: Instant) -> Stabilized {
    if !items.is_empty() {
      let items: Arc<[DetectItem]> = items.into();
      self.last = Some((items.clone(), now));
      return Stabilized {
        state: StabilizerState::Fresh,
        items,
      };
    }

    match &self.last {
      Some((held, at)) if now.saturating_duration_since(*at) < self.grace_period => Stabilized {
        state: StabilizerState::Held,
        items: held.clone(),
      },
      _ => Stabilized::default(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::BBox;

  fn detection(score: f32) -> DetectItem {
    DetectItem {
      label: "object".to_string(),
      score,
      bbox: BBox::new(0.1, 0.1, 0.2, 0.2),
    }
  }

  #[test]
  fn empty_before_any_detection() {
    let mut stabilizer = TemporalStabilizer::default();
    let out = stabilizer.update(Vec::new(), Instant::now());
    assert_eq!(out.state, StabilizerState::Empty);
    assert!(out.items.is_empty());
  }

  #[test]
  fn fresh_replaces_stored_list() {
    let t0 = Instant::now();
    let mut stabilizer = TemporalStabilizer::default();
    stabilizer.update(vec![detection(0.5)], t0);
    let out = stabilizer.update(vec![detection(0.9)], t0 + Duration::from_millis(10));
    assert_eq!(out.state, StabilizerState::Fresh);
    assert_eq!(&*out.items, &[detection(0.9)]);
    assert_eq!(
      stabilizer.last_detection_at(),
      Some(t0 + Duration::from_millis(10))
    );
  }

  #[test]
  fn grace_period_boundary() {
    let t0 = Instant::now();
    let mut stabilizer = TemporalStabilizer::default();
    stabilizer.update(vec![detection(0.8)], t0);

    let held = stabilizer.update(Vec::new(), t0 + Duration::from_millis(299));
    assert_eq!(held.state, StabilizerState::Held);
    assert_eq!(&*held.items, &[detection(0.8)]);

    let expired = stabilizer.update(Vec::new(), t0 + Duration::from_millis(300));
    assert_eq!(expired.state, StabilizerState::Empty);
    assert!(expired.items.is_empty());
  }

  #[test]
  fn empty_frames_do_not_extend_the_window() {
    let t0 = Instant::now();
    let mut stabilizer = TemporalStabilizer::default();
    stabilizer.update(vec![detection(0.8)], t0);
    for ms in [50, 100, 150, 200, 250] {
      let out = stabilizer.update(Vec::new(), t0 + Duration::from_millis(ms));
      assert_eq!(out.state, StabilizerState::Held);
    }
    assert_eq!(stabilizer.last_detection_at(), Some(t0));
    let out = stabilizer.update(Vec::new(), t0 + Duration::from_millis(301));
    assert_eq!(out.state, StabilizerState::Empty);
  }

  #[test]
  fn clock_going_backwards_keeps_holding() {
    let t0 = Instant::now() + Duration::from_secs(1);
    let mut stabilizer = TemporalStabilizer::default();
    stabilizer.update(vec![detection(0.8)], t0);
    let out = stabilizer.update(Vec::new(), t0 - Duration::from_millis(5));
    assert_eq!(out.state, StabilizerState::Held);
  }

  #[test]
  fn custom_grace_period() {
    let t0 = Instant::now();
    let mut stabilizer = TemporalStabilizer::new(Duration::from_millis(50));
    stabilizer.update(vec![detection(0.8)], t0);
    let out = stabilizer.update(Vec::new(), t0 + Duration::from_millis(60));
    assert_eq!(out.state, StabilizerState::Empty);
  }
}
