// 该文件是 Xunfeng （巡蜂） 项目的一部分。
// src/model/tensor.rs - 输出张量视图与反量化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # 输出张量
//!
//! 检测模型的输出张量形状为 `[1, channels, anchors]`，通道顺序为
//! `[x, y, w, h, score, ...]`，只使用前 5 个通道。
//!
//! 数据按通道优先（channel-major）排列：
//! `(channel, anchor)` 的扁平索引为 `channel * anchors + anchor`。
//! 若按锚点优先读取，所有框都会被静默地解码错误。
//!
//! 元素类型可以是 8 位仿射量化（有符号或无符号）或 32 位浮点（本机字节序）。

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 框坐标所在的通道 x, y, w, h
pub const BOX_CHANNELS: [usize; 4] = [0, 1, 2, 3];
/// 置信度通道
pub const SCORE_CHANNEL: usize = 4;
/// 解码所需的最少通道数
pub const MIN_CHANNELS: usize = 5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TensorError {
  #[error("张量维度不足: 期望至少 3 维, 实际为 {0} 维")]
  RankTooLow(usize),
  #[error("张量通道数不足: 期望至少 5, 实际为 {0}")]
  TooFewChannels(usize),
  #[error("张量锚点数为 0")]
  NoAnchors,
  #[error("张量尺寸溢出: {channels} 通道 x {anchors} 锚点")]
  ShapeOverflow { channels: usize, anchors: usize },
  #[error("张量数据长度不足: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferTooShort { expected: usize, actual: usize },
  #[error("量化参数无效: scale = {0}")]
  InvalidScale(f32),
  #[error("未知的元素类型: {0}")]
  UnknownElementType(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
  Int8,
  UInt8,
  Float32,
}

impl ElementType {
  /// 单个元素占用的字节数
  pub fn size(&self) -> usize {
    match self {
      ElementType::Int8 | ElementType::UInt8 => 1,
      ElementType::Float32 => 4,
    }
  }

  pub fn is_quantized(&self) -> bool {
    !matches!(self, ElementType::Float32)
  }
}

impl FromStr for ElementType {
  type Err = TensorError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "int8" | "i8" => Ok(ElementType::Int8),
      "uint8" | "u8" => Ok(ElementType::UInt8),
      "float32" | "f32" => Ok(ElementType::Float32),
      other => Err(TensorError::UnknownElementType(other.to_string())),
    }
  }
}

/// 仿射量化参数: `real = scale * (stored - zero_point)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantization {
  pub scale: f32,
  pub zero_point: i32,
}

impl Quantization {
  pub const IDENTITY: Quantization = Quantization {
    scale: 1.0,
    zero_point: 0,
  };

  pub fn new(scale: f32, zero_point: i32) -> Self {
    Self { scale, zero_point }
  }

  pub fn dequantize(&self, stored: i32) -> f32 {
    self.scale * (stored as f32 - self.zero_point as f32)
  }
}

impl Default for Quantization {
  fn default() -> Self {
    Self::IDENTITY
  }
}

/// 张量中存储的原始元素
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawElement {
  Int8(i8),
  UInt8(u8),
  Float32(f32),
}

/// 反量化单个元素。浮点元素原样返回，量化参数不参与计算。
pub fn dequantize(raw: RawElement, quantization: Quantization) -> f32 {
  match raw {
    RawElement::Float32(value) => value,
    RawElement::Int8(value) => quantization.dequantize(value as i32),
    RawElement::UInt8(value) => quantization.dequantize(value as i32),
  }
}

/// 模型提供方在启动时给出的输出张量描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorDescriptor {
  pub shape: Vec<usize>,
  pub element_type: ElementType,
  #[serde(default)]
  pub quantization: Quantization,
}

impl TensorDescriptor {
  pub fn new(shape: Vec<usize>, element_type: ElementType, quantization: Quantization) -> Self {
    Self {
      shape,
      element_type,
      quantization,
    }
  }

  /// `[1, channels, anchors]` 形状的描述
  pub fn detection(
    channels: usize,
    anchors: usize,
    element_type: ElementType,
    quantization: Quantization,
  ) -> Self {
    Self::new(vec![1, channels, anchors], element_type, quantization)
  }

  /// 校验形状与量化参数，返回 `(channels, anchors)`
  pub fn validate(&self) -> Result<(usize, usize), TensorError> {
    if self.shape.len() < 3 {
      return Err(TensorError::RankTooLow(self.shape.len()));
    }
    let channels = self.shape[1];
    let anchors = self.shape[2];
    if channels < MIN_CHANNELS {
      return Err(TensorError::TooFewChannels(channels));
    }
    if anchors == 0 {
      return Err(TensorError::NoAnchors);
    }
    checked_len(channels, anchors, self.element_type)?;
    if self.element_type.is_quantized()
      && !(self.quantization.scale.is_finite() && self.quantization.scale > 0.0)
    {
      return Err(TensorError::InvalidScale(self.quantization.scale));
    }
    Ok((channels, anchors))
  }

  /// 第一个 batch 所需的字节数
  pub fn byte_len(&self) -> Result<usize, TensorError> {
    let (channels, anchors) = self.validate()?;
    checked_len(channels, anchors, self.element_type)
  }
}

fn checked_len(
  channels: usize,
  anchors: usize,
  element_type: ElementType,
) -> Result<usize, TensorError> {
  channels
    .checked_mul(anchors)
    .and_then(|n| n.checked_mul(element_type.size()))
    .ok_or(TensorError::ShapeOverflow { channels, anchors })
}

/// 扁平字节缓冲区之上的只读张量视图
#[derive(Debug, Clone, Copy)]
pub struct TensorView<'a> {
  bytes: &'a [u8],
  element_type: ElementType,
  quantization: Quantization,
  channels: usize,
  anchors: usize,
}

impl<'a> TensorView<'a> {
  pub fn new(descriptor: &TensorDescriptor, bytes: &'a [u8]) -> Result<Self, TensorError> {
    let (channels, anchors) = descriptor.validate()?;
    let expected = checked_len(channels, anchors, descriptor.element_type)?;
    if bytes.len() < expected {
      return Err(TensorError::BufferTooShort {
        expected,
        actual: bytes.len(),
      });
    }

    Ok(Self {
      bytes,
      element_type: descriptor.element_type,
      quantization: descriptor.quantization,
      channels,
      anchors,
    })
  }

  pub fn channels(&self) -> usize {
    self.channels
  }

  pub fn anchors(&self) -> usize {
    self.anchors
  }

  pub fn element_type(&self) -> ElementType {
    self.element_type
  }

  /// 通道优先的扁平索引
  #[inline]
  pub fn index(&self, channel: usize, anchor: usize) -> usize {
    channel * self.anchors + anchor
  }

  pub fn raw(&self, channel: usize, anchor: usize) -> RawElement {
    let index = self.index(channel, anchor);
    match self.element_type {
      ElementType::Int8 => RawElement::Int8(self.bytes[index] as i8),
      ElementType::UInt8 => RawElement::UInt8(self.bytes[index]),
      ElementType::Float32 => {
        let offset = index * 4;
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.bytes[offset..offset + 4]);
        RawElement::Float32(f32::from_ne_bytes(word))
      }
    }
  }

  /// 反量化后的实数值
  #[inline]
  pub fn value(&self, channel: usize, anchor: usize) -> f32 {
    dequantize(self.raw(channel, anchor), self.quantization)
  }
}
