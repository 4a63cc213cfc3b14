// 该文件是 Xunfeng （巡蜂） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::ImageReader;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FrameError, RgbFrame},
  input::InputError,
};

/// 单张图像输入，只产生一帧
pub struct ImageFileInput {
  frame: Option<RgbFrame>,
}

impl ImageFileInput {
  pub fn from_frame(frame: RgbFrame) -> Self {
    Self { frame: Some(frame) }
  }
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch {
        expected: Self::SCHEME,
        actual: url.scheme().to_string(),
      });
    }

    let path = url.path();
    info!("读取图像文件: {}", path);
    let image = ImageReader::open(path)
      .map_err(FrameError::from)?
      .decode()
      .map_err(FrameError::from)?;
    let frame = RgbFrame::new(0, image.into_rgb8())?;

    Ok(Self::from_frame(frame))
  }
}

impl Iterator for ImageFileInput {
  type Item = Result<RgbFrame, FrameError>;

  fn next(&mut self) -> Option<Self::Item> {
    self.frame.take().map(Ok)
  }
}
