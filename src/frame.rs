// 该文件是 Xunfeng （巡蜂） 项目的一部分。
// src/frame.rs - RGB 帧与模型输入预处理
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use clap::ValueEnum;
use image::{RgbImage, imageops};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{InputSpec, TensorLayout, tensor::ElementType};

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("图像解码错误: {0}")]
  Decode(#[from] image::ImageError),
  #[error("图像尺寸为空")]
  EmptyImage,
}

/// 已解码、方向已校正的 RGB 帧
#[derive(Debug, Clone)]
pub struct RgbFrame {
  index: u64,
  image: RgbImage,
}

impl RgbFrame {
  pub fn new(index: u64, image: RgbImage) -> Result<Self, FrameError> {
    if image.width() == 0 || image.height() == 0 {
      return Err(FrameError::EmptyImage);
    }
    Ok(Self { index, image })
  }

  pub fn index(&self) -> u64 {
    self.index
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn with_index(mut self, index: u64) -> Self {
    self.index = index;
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ResizeMode {
  /// 直接拉伸到正方形输入
  #[default]
  #[value(name = "stretch")]
  Stretch,
  /// 先居中裁剪为正方形再缩放
  #[value(name = "center_crop")]
  CenterCrop,
}

/// 将帧缩放到模型的正方形输入分辨率，并映射到模型的输入数值域
#[derive(Debug, Clone)]
pub struct Preprocessor {
  size: u32,
  resize: ResizeMode,
  spec: InputSpec,
}

impl Preprocessor {
  pub fn new(size: u32, resize: ResizeMode, spec: InputSpec) -> Self {
    Self { size, resize, spec }
  }

  pub fn input_len(&self) -> usize {
    let pixels = self.size as usize * self.size as usize * RGB_CHANNELS;
    pixels * self.spec.element_type.size()
  }

  pub fn resize(&self, frame: &RgbFrame) -> RgbImage {
    let image = frame.image();
    let source = match self.resize {
      ResizeMode::Stretch => None,
      ResizeMode::CenterCrop => {
        let side = image.width().min(image.height());
        let x = (image.width() - side) / 2;
        let y = (image.height() - side) / 2;
        Some(imageops::crop_imm(image, x, y, side, side).to_image())
      }
    };
    let source = source.as_ref().unwrap_or(image);

    if source.width() == self.size && source.height() == self.size {
      return source.clone();
    }
    imageops::resize(source, self.size, self.size, imageops::FilterType::Triangle)
  }

  pub fn prepare(&self, frame: &RgbFrame) -> Vec<u8> {
    let resized = self.resize(frame);
    let size = self.size as usize;
    let mut out = Vec::with_capacity(self.input_len());

    match self.spec.layout {
      TensorLayout::Nhwc => {
        for value in resized.as_raw() {
          push_value(&mut out, *value, self.spec.element_type);
        }
      }
      TensorLayout::Nchw => {
        let raw = resized.as_raw();
        for c in 0..RGB_CHANNELS {
          for h in 0..size {
            for w in 0..size {
              let index = h * size * RGB_CHANNELS + w * RGB_CHANNELS + c;
              push_value(&mut out, raw[index], self.spec.element_type);
            }
          }
        }
      }
    }
    out
  }
}

#[inline]
fn push_value(out: &mut Vec<u8>, value: u8, element_type: ElementType) {
  match element_type {
    ElementType::UInt8 => out.push(value),
    // scale 1/255, zero_point -128
    ElementType::Int8 => out.push((value as i16 - 128) as i8 as u8),
    ElementType::Float32 => out.extend_from_slice(&(value as f32 / 255.0).to_ne_bytes()),
  }
}
