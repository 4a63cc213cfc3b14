// 该文件是 Xunfeng （巡蜂） 项目的一部分。
// src/main.rs - 连续检测主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use xunfeng::{
  FromUrl,
  args::{CommonArgs, init_tracing},
  input::InputWrapper,
  model::load_runtime,
  output::OutputWrapper,
  pipeline::DetectionPipeline,
  task::{ContinuousTask, Task},
};

/// Xunfeng 连续检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub common: CommonArgs,

  /// 处理指定帧数后退出
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
}

fn main() -> Result<()> {
  init_tracing();

  let args = Args::parse();
  let config = args.common.pipeline_config().context("配置无效")?;
  args.common.log_summary(&config);

  let input = InputWrapper::from_url(&args.common.input).context("打开输入失败")?;
  let output = OutputWrapper::from_url(&args.common.output).context("创建输出失败")?;
  let pipeline = DetectionPipeline::new(load_runtime(&args.common.model), &config);

  let summary = ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .run_task(input, pipeline, output)?;

  info!(
    "共渲染 {} 次检测结果, 丢弃 {} 帧",
    summary.snapshots_rendered, summary.frames_dropped
  );
  Ok(())
}
