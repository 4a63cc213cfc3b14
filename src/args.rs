// 该文件是 Xunfeng （巡蜂） 项目的一部分。
// src/args.rs - 命令行公共参数
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use clap::Args;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::config::{ConfigError, ConfigOverrides, PipelineConfig};

/// 各个可执行程序共用的参数
#[derive(Args, Debug)]
pub struct CommonArgs {
  /// 模型地址
  /// - 回放: replay:///path/to/tensor.bin?type=int8&scale=0.0039&zero_point=-128
  /// - ONNX: onnx:///path/to/model.onnx
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 输入来源
  /// - 图片: image:///path/to/image.jpg
  /// - 目录: folder:///path/to/images?repeat=3
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出路径
  /// - 日志: log://
  /// - 目录记录: folder:///path/to/records
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// JSON 配置文件
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  #[command(flatten)]
  pub overrides: ConfigOverrides,
}

impl CommonArgs {
  /// 合并默认值、配置文件与命令行参数并校验
  pub fn pipeline_config(&self) -> Result<PipelineConfig, ConfigError> {
    let mut config = match &self.config {
      Some(path) => PipelineConfig::from_json_file(path)?,
      None => PipelineConfig::default(),
    };
    config.apply(&self.overrides);
    config.validate()?;
    Ok(config)
  }

  pub fn log_summary(&self, config: &PipelineConfig) {
    info!("模型地址: {}", self.model);
    info!("输入来源: {}", self.input);
    info!("输出路径: {}", self.output);
    info!(
      "置信度阈值: {}, NMS 阈值: {}, 宽限期: {}ms",
      config.confidence_threshold, config.iou_threshold, config.grace_period_ms
    );
  }
}

/// 安装日志订阅器，`RUST_LOG` 未设置时默认 info
pub fn init_tracing() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt().with_env_filter(filter).init();
}
