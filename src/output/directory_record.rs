// 该文件是 Xunfeng （巡蜂） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme, query_flag,
  output::{OutputError, Render},
  worker::Published,
};

#[derive(Serialize)]
struct RecordDocument<'a> {
  recorded_at: String,
  #[serde(flatten)]
  published: &'a Published,
}

/// 将每次发布的检测结果写为 JSON 文件
///
/// 文件按 `YYYY/MM/DD/HH-MM-SS-XXXX.json` 组织，`XXXX` 为十六进制序号。
/// 默认只记录非空结果，`?always` 时空结果也记录。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  frame_counters: Arc<Mutex<u16>>,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = OutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch {
        expected: Self::SCHEME,
        actual: uri.scheme().to_string(),
      });
    }

    Ok(Self::new(uri.path(), query_flag(uri, "always")))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl AsRef<Path>, always: bool) -> Self {
    Self {
      directory: directory.as_ref().to_path_buf(),
      frame_counters: Arc::new(Mutex::new(0)),
      always,
    }
  }

  fn frame_id(&self) -> Result<u16, OutputError> {
    let mut counter = self
      .frame_counters
      .lock()
      .map_err(|_| OutputError::Poisoned)?;
    let id = counter.wrapping_add(1);
    *counter = id;
    Ok(id)
  }

  fn frame_path(&self, now: DateTime<Utc>) -> Result<PathBuf, OutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }

    Ok(directory.join(format!(
      "{}-{:04X}.json",
      now.format("%H-%M-%S"),
      self.frame_id()?
    )))
  }

  /// 写入一次发布结果，返回文件路径；跳过时返回 `None`
  pub fn record(&self, published: &Published) -> Result<Option<PathBuf>, OutputError> {
    if !self.always && published.detections.is_empty() {
      return Ok(None);
    }

    let now = Utc::now();
    let path = self.frame_path(now)?;
    let document = RecordDocument {
      recorded_at: now.to_rfc3339(),
      published,
    };
    let writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(writer, &document)?;
    debug!("记录检测结果: {}", path.display());
    Ok(Some(path))
  }
}

impl Render<Published> for DirectoryRecordOutput {
  type Error = OutputError;

  fn render_result(&self, result: &Published) -> Result<(), Self::Error> {
    self.record(result).map(|_| ())
  }
}
