// 该文件是 Xunfeng （巡蜂） 项目的一部分。
// src/output/log_output.rs - 日志输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{OutputError, Render},
  worker::Published,
};

/// 通过 tracing 输出检测结果
pub struct LogOutput;

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch {
        expected: Self::SCHEME,
        actual: url.scheme().to_string(),
      });
    }
    Ok(LogOutput)
  }
}

impl Render<Published> for LogOutput {
  type Error = OutputError;

  fn render_result(&self, result: &Published) -> Result<(), Self::Error> {
    if !result.model_available {
      debug!("第 {} 帧: 模型不可用", result.frame_index);
      return Ok(());
    }

    if result.detections.is_empty() {
      debug!("第 {} 帧: 无检测 ({:?})", result.frame_index, result.state);
      return Ok(());
    }

    info!(
      "第 {} 帧: 检测到 {} 个对象 ({:?})",
      result.frame_index,
      result.detections.len(),
      result.state
    );
    for item in result.detections.iter() {
      info!(
        "  - {}: {:.2}% at ({:.3}, {:.3}, {:.3}, {:.3})",
        item.label,
        item.score * 100.0,
        item.bbox.left,
        item.bbox.top,
        item.bbox.right,
        item.bbox.bottom
      );
    }
    Ok(())
  }
}
