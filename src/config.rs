// 该文件是 Xunfeng （巡蜂） 项目的一部分。
// src/config.rs - 流水线参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{path::Path, time::Duration};

use clap::Args;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::ResizeMode,
  model::decode::{DecodeOptions, ScaleHeuristic},
};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("读取配置文件失败: {0}")]
  Io(#[from] std::io::Error),
  #[error("解析配置文件失败: {0}")]
  Parse(#[from] serde_json::Error),
  #[error("参数 {name} 无效: {reason}")]
  Invalid { name: &'static str, reason: String },
}

impl ConfigError {
  fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
    ConfigError::Invalid {
      name,
      reason: reason.into(),
    }
  }
}

/// 检测流水线可调参数
///
/// 优先级由低到高: 默认值、JSON 配置文件、命令行参数。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
  /// 置信度阈值，严格大于该值的锚点才会输出
  pub confidence_threshold: f32,
  /// NMS IoU 阈值
  pub iou_threshold: f32,
  /// 模型正方形输入边长
  pub input_size: u32,
  /// 空帧沿用上一次结果的时长（毫秒）
  pub grace_period_ms: u64,
  /// 坐标幅值超过该值时视为像素坐标
  pub coordinate_bound: f32,
  pub scale_heuristic: ScaleHeuristic,
  /// 单类别模型的标签
  pub label: String,
  pub resize: ResizeMode,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      confidence_threshold: 0.20,
      iou_threshold: 0.5,
      input_size: 640,
      grace_period_ms: 300,
      coordinate_bound: 10.0,
      scale_heuristic: ScaleHeuristic::PerField,
      label: "object".to_string(),
      resize: ResizeMode::Stretch,
    }
  }
}

impl PipelineConfig {
  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    debug!("读取配置文件: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&self.confidence_threshold) {
      return Err(ConfigError::invalid(
        "confidence_threshold",
        format!("{} 不在 [0, 1] 内", self.confidence_threshold),
      ));
    }
    if !(0.0..=1.0).contains(&self.iou_threshold) {
      return Err(ConfigError::invalid(
        "iou_threshold",
        format!("{} 不在 [0, 1] 内", self.iou_threshold),
      ));
    }
    if self.input_size == 0 {
      return Err(ConfigError::invalid("input_size", "不能为 0"));
    }
    if !(self.coordinate_bound > 0.0) {
      return Err(ConfigError::invalid(
        "coordinate_bound",
        format!("{} 必须为正数", self.coordinate_bound),
      ));
    }
    Ok(())
  }

  pub fn grace_period(&self) -> Duration {
    Duration::from_millis(self.grace_period_ms)
  }

  pub fn decode_options(&self) -> DecodeOptions {
    DecodeOptions {
      confidence_threshold: self.confidence_threshold,
      input_size: self.input_size,
      coordinate_bound: self.coordinate_bound,
      heuristic: self.scale_heuristic,
      label: self.label.clone(),
    }
  }

  pub fn apply(&mut self, overrides: &ConfigOverrides) {
    if let Some(v) = overrides.confidence {
      self.confidence_threshold = v;
    }
    if let Some(v) = overrides.iou_threshold {
      self.iou_threshold = v;
    }
    if let Some(v) = overrides.input_size {
      self.input_size = v;
    }
    if let Some(v) = overrides.grace_period_ms {
      self.grace_period_ms = v;
    }
    if let Some(v) = overrides.coordinate_bound {
      self.coordinate_bound = v;
    }
    if let Some(v) = overrides.scale_heuristic {
      self.scale_heuristic = v;
    }
    if let Some(v) = &overrides.label {
      self.label = v.clone();
    }
    if let Some(v) = overrides.resize {
      self.resize = v;
    }
  }
}

/// 命令行覆盖项，未给出的参数保持配置文件或默认值
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigOverrides {
  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence: Option<f32>,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub iou_threshold: Option<f32>,

  /// 模型输入边长
  #[arg(long, value_name = "PIXELS")]
  pub input_size: Option<u32>,

  /// 宽限期（毫秒）
  #[arg(long, value_name = "MS")]
  pub grace_period_ms: Option<u64>,

  /// 像素坐标判别界限
  #[arg(long, value_name = "BOUND")]
  pub coordinate_bound: Option<f32>,

  #[arg(long, value_enum)]
  pub scale_heuristic: Option<ScaleHeuristic>,

  #[arg(long)]
  pub label: Option<String>,

  #[arg(long, value_enum)]
  pub resize: Option<ResizeMode>,
}
