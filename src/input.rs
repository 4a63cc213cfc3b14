// 该文件是 Xunfeng （巡蜂） 项目的一部分。
// src/input.rs - 图像输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FrameError, RgbFrame},
};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::ImageFileInput;

mod image_directory;
pub use self::image_directory::ImageDirectoryInput;

#[derive(Error, Debug)]
pub enum InputError {
  #[error("URI 方案不匹配: 期望 {expected}, 实际 {actual}")]
  SchemeMismatch {
    expected: &'static str,
    actual: String,
  },
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("帧读取错误: {0}")]
  Frame(#[from] FrameError),
  #[error("参数 {0} 无效: {1}")]
  InvalidParameter(&'static str, String),
  #[error("目录中没有图像: {0}")]
  EmptyDirectory(String),
}

impl From<(&'static str, String)> for InputError {
  fn from((name, value): (&'static str, String)) -> Self {
    InputError::InvalidParameter(name, value)
  }
}

pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  ImageDirectory(ImageDirectoryInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "read_image_file")]
    {
      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    if url.scheme() == ImageDirectoryInput::SCHEME {
      let input = ImageDirectoryInput::from_url(url)?;
      return Ok(InputWrapper::ImageDirectory(input));
    }
    Err(InputError::SchemeMismatch {
      expected: "image|folder",
      actual: url.scheme().to_string(),
    })
  }
}

impl Iterator for InputWrapper {
  type Item = Result<RgbFrame, FrameError>;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.next(),
      InputWrapper::ImageDirectory(input) => input.next(),
    }
  }
}
