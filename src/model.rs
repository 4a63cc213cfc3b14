// 该文件是 Xunfeng （巡蜂） 项目的一部分。
// src/model.rs - 模型与检测结果
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use url::Url;

use crate::FromUrl;

pub mod decode;
pub mod nms;
pub mod tensor;

mod replay;
pub use self::replay::ReplayModel;

#[cfg(feature = "model_tract")]
mod tract;
#[cfg(feature = "model_tract")]
pub use self::tract::TractModel;

use self::tensor::{ElementType, TensorDescriptor, TensorError};

/// 归一化坐标下的轴对齐边界框
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl BBox {
  pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
    Self {
      left,
      top,
      right,
      bottom,
    }
  }

  /// 由中心点和宽高构造
  pub fn from_center(x: f32, y: f32, w: f32, h: f32) -> Self {
    let half_w = w / 2.0;
    let half_h = h / 2.0;
    Self {
      left: x - half_w,
      top: y - half_h,
      right: x + half_w,
      bottom: y + half_h,
    }
  }

  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }

  pub fn area(&self) -> f32 {
    self.width().max(0.0) * self.height().max(0.0)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectItem {
  pub label: String,
  pub score: f32,
  pub bbox: BBox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
  #[default]
  Nhwc,
  Nchw,
}

impl FromStr for TensorLayout {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "nhwc" => Ok(TensorLayout::Nhwc),
      "nchw" => Ok(TensorLayout::Nchw),
      other => Err(format!("未知的张量布局: {}", other)),
    }
  }
}

/// 推理运行时期望的输入格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSpec {
  pub layout: TensorLayout,
  pub element_type: ElementType,
}

impl Default for InputSpec {
  fn default() -> Self {
    Self {
      layout: TensorLayout::Nhwc,
      element_type: ElementType::Int8,
    }
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("模型路径必须使用 {expected} 方案, 实际为 {actual}")]
  SchemeMismatch {
    expected: &'static str,
    actual: String,
  },
  #[error("输出张量描述无效: {0}")]
  InvalidDescriptor(#[from] TensorError),
  #[error("缺少参数: {0}")]
  MissingParameter(&'static str),
  #[error("参数 {0} 无效: {1}")]
  InvalidParameter(&'static str, String),
  #[error("目录中没有可回放的张量: {0}")]
  NoRecordings(String),
  #[error("推理错误: {0}")]
  Runtime(String),
}

impl From<(&'static str, String)> for ModelError {
  fn from((name, value): (&'static str, String)) -> Self {
    ModelError::InvalidParameter(name, value)
  }
}

/// 推理运行时
///
/// 输出描述在加载时读取一次。`infer` 返回的字节在下次调用前有效，
/// 运行时不可重入，由唯一的解码工作线程独占使用。
pub trait InferenceRuntime: Send {
  fn name(&self) -> &'static str;
  fn input_spec(&self) -> InputSpec;
  fn output_descriptor(&self) -> &TensorDescriptor;

  /// 运行时固定的输入边长，`None` 表示接受任意尺寸
  fn input_size(&self) -> Option<u32> {
    None
  }

  fn infer(&mut self, input: &[u8]) -> Result<&[u8], ModelError>;
}

pub enum ModelWrapper {
  Replay(ReplayModel),
  #[cfg(feature = "model_tract")]
  Tract(TractModel),
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    use crate::FromUrlWithScheme;

    match url.scheme() {
      ReplayModel::SCHEME => Ok(ModelWrapper::Replay(ReplayModel::from_url(url)?)),
      #[cfg(feature = "model_tract")]
      TractModel::SCHEME => Ok(ModelWrapper::Tract(TractModel::from_url(url)?)),
      other => Err(ModelError::SchemeMismatch {
        expected: "replay|onnx",
        actual: other.to_string(),
      }),
    }
  }
}

impl ModelWrapper {
  pub fn into_runtime(self) -> Box<dyn InferenceRuntime> {
    match self {
      ModelWrapper::Replay(model) => Box::new(model),
      #[cfg(feature = "model_tract")]
      ModelWrapper::Tract(model) => Box::new(model),
    }
  }
}

/// 按 URL 加载模型，返回结果交给流水线决定是否进入不可用状态
pub fn load_runtime(url: &Url) -> Result<Box<dyn InferenceRuntime>, ModelError> {
  ModelWrapper::from_url(url).map(ModelWrapper::into_runtime)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn center_to_corner() {
    let bbox = BBox::from_center(0.5, 0.5, 0.1, 0.2);
    assert!((bbox.left - 0.45).abs() < 1e-5);
    assert!((bbox.top - 0.4).abs() < 1e-5);
    assert!((bbox.right - 0.55).abs() < 1e-5);
    assert!((bbox.bottom - 0.6).abs() < 1e-5);
    assert!((bbox.area() - 0.02).abs() < 1e-5);
  }

  #[test]
  fn inverted_box_has_no_area() {
    let bbox = BBox::new(0.6, 0.6, 0.4, 0.4);
    assert_eq!(bbox.area(), 0.0);
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("rknn:///tmp/model.rknn").unwrap();
    assert!(matches!(
      ModelWrapper::from_url(&url),
      Err(ModelError::SchemeMismatch { .. })
    ));
  }

  #[test]
  fn layout_parsing() {
    assert_eq!("NCHW".parse::<TensorLayout>(), Ok(TensorLayout::Nchw));
    assert_eq!("nhwc".parse::<TensorLayout>(), Ok(TensorLayout::Nhwc));
    assert!("hwc".parse::<TensorLayout>().is_err());
  }
}
