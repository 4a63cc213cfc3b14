// 该文件是 Xunfeng （巡蜂） 项目的一部分。
// src/input/image_directory.rs - 图像目录输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  path::{Path, PathBuf},
  thread,
  time::Duration,
};

use image::ImageReader;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FrameError, RgbFrame},
  input::InputError,
  query_value,
};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// 按文件名顺序逐张读取目录中的图像
///
/// 图像在迭代时才解码，无法解码的文件产生 `Err(FrameError)`。
/// 查询参数 `repeat` 控制整个目录的重复次数，`interval_ms` 控制帧间隔。
pub struct ImageDirectoryInput {
  files: Vec<PathBuf>,
  repeat: usize,
  interval: Duration,
  cursor: usize,
  index: u64,
}

fn is_image(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      IMAGE_EXTENSIONS
        .iter()
        .any(|known| ext.eq_ignore_ascii_case(known))
    })
    .unwrap_or(false)
}

fn load_frame(path: &Path, index: u64) -> Result<RgbFrame, FrameError> {
  let image = ImageReader::open(path)?.decode()?;
  RgbFrame::new(index, image.into_rgb8())
}

impl ImageDirectoryInput {
  pub fn open(dir: impl AsRef<Path>) -> Result<Self, InputError> {
    let dir = dir.as_ref();
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
      let path = entry?.path();
      if path.is_file() && is_image(&path) {
        files.push(path);
      }
    }
    if files.is_empty() {
      return Err(InputError::EmptyDirectory(dir.display().to_string()));
    }
    files.sort();
    info!("图像目录 {} 共 {} 张图像", dir.display(), files.len());

    Ok(Self {
      files,
      repeat: 1,
      interval: Duration::ZERO,
      cursor: 0,
      index: 0,
    })
  }

  pub fn with_repeat(mut self, repeat: usize) -> Self {
    self.repeat = repeat;
    self
  }

  pub fn with_interval(mut self, interval: Duration) -> Self {
    self.interval = interval;
    self
  }

  pub fn len(&self) -> usize {
    self.files.len() * self.repeat
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl FromUrlWithScheme for ImageDirectoryInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ImageDirectoryInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InputError::SchemeMismatch {
        expected: Self::SCHEME,
        actual: url.scheme().to_string(),
      });
    }

    let repeat: usize = query_value(url, "repeat")?.unwrap_or(1);
    let interval_ms: u64 = query_value(url, "interval_ms")?.unwrap_or(0);

    Ok(
      Self::open(url.path())?
        .with_repeat(repeat)
        .with_interval(Duration::from_millis(interval_ms)),
    )
  }
}

impl Iterator for ImageDirectoryInput {
  type Item = Result<RgbFrame, FrameError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.cursor >= self.len() {
      return None;
    }
    if self.cursor > 0 && !self.interval.is_zero() {
      thread::sleep(self.interval);
    }

    let path = &self.files[self.cursor % self.files.len()];
    let index = self.index;
    self.cursor += 1;
    self.index += 1;
    debug!("读取第 {} 帧: {}", index, path.display());
    Some(load_frame(path, index))
  }
}
