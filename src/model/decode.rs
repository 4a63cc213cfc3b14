// 该文件是 Xunfeng （巡蜂） 项目的一部分。
// src/model/decode.rs - 锚点解码
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{
  BBox, DetectItem,
  tensor::{BOX_CHANNELS, SCORE_CHANNEL, TensorView},
};

/// 坐标尺度判别策略
///
/// 模型输出的框坐标可能已经归一化到 [0,1]，也可能是输入分辨率下的绝对像素。
/// 没有任何信号能可靠区分二者，这里只是一个经验猜测：
/// 幅值超过判别界限的坐标视为像素坐标并除以输入尺寸。
/// 靠近图像边缘的归一化坐标或极小目标的像素坐标都可能被误判。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ScaleHeuristic {
  /// x, y, w, h 各自独立判断
  #[default]
  #[value(name = "per_field")]
  PerField,
  /// 任一字段超过界限则四个字段都按像素处理
  #[value(name = "per_box")]
  PerBox,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOptions {
  pub confidence_threshold: f32,
  pub input_size: u32,
  pub coordinate_bound: f32,
  pub heuristic: ScaleHeuristic,
  pub label: String,
}

impl Default for DecodeOptions {
  fn default() -> Self {
    Self {
      confidence_threshold: 0.20,
      input_size: 640,
      coordinate_bound: 10.0,
      heuristic: ScaleHeuristic::PerField,
      label: "object".to_string(),
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct DecodeSummary {
  /// 锚点顺序的候选框（未经抑制）
  pub items: Vec<DetectItem>,
  /// 本帧见到的最高置信度，包括低于阈值的锚点
  pub best_score: Option<f32>,
}

#[inline]
fn normalize_field(value: f32, input_size: f32, bound: f32) -> f32 {
  if value.abs() > bound {
    value / input_size
  } else {
    value
  }
}

/// 将 `[x, y, w, h]` 归一化到 [0,1] 空间
pub fn normalize_coordinates(raw: [f32; 4], options: &DecodeOptions) -> [f32; 4] {
  let size = options.input_size as f32;
  let bound = options.coordinate_bound;
  match options.heuristic {
    ScaleHeuristic::PerField => raw.map(|v| normalize_field(v, size, bound)),
    ScaleHeuristic::PerBox => {
      if raw.iter().any(|v| v.abs() > bound) {
        raw.map(|v| v / size)
      } else {
        raw
      }
    }
  }
}

pub fn decode(view: &TensorView<'_>, options: &DecodeOptions) -> Vec<DetectItem> {
  decode_with_summary(view, options).items
}

pub fn decode_with_summary(view: &TensorView<'_>, options: &DecodeOptions) -> DecodeSummary {
  let mut items = Vec::new();
  let mut best_score: Option<f32> = None;

  for anchor in 0..view.anchors() {
    let score = view.value(SCORE_CHANNEL, anchor);
    if best_score.is_none_or(|best| score > best) {
      best_score = Some(score);
    }

    // 等于阈值的锚点不输出
    if !(score > options.confidence_threshold) {
      continue;
    }

    let raw = BOX_CHANNELS.map(|channel| view.value(channel, anchor));
    let [x, y, w, h] = normalize_coordinates(raw, options);

    items.push(DetectItem {
      bbox: BBox::from_center(x, y, w, h),
      score,
      label: options.label.clone(),
    });
  }

  debug!(
    "解码 {} 个锚点, 候选框 {} 个, 最高置信度 {:?} (阈值 {})",
    view.anchors(),
    items.len(),
    best_score,
    options.confidence_threshold
  );

  DecodeSummary { items, best_score }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::tensor::{ElementType, Quantization, TensorDescriptor};

  /// 按通道优先顺序排列 `[x, y, w, h, score]` 五元组
  fn channel_major(anchors: &[[f32; 5]]) -> Vec<f32> {
    let mut out = vec![0.0; 5 * anchors.len()];
    for (a, values) in anchors.iter().enumerate() {
      for (c, v) in values.iter().enumerate() {
        out[c * anchors.len() + a] = *v;
      }
    }
    out
  }

  fn float_tensor(anchors: &[[f32; 5]]) -> (TensorDescriptor, Vec<u8>) {
    let values = channel_major(anchors);
    let bytes = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
    let desc = TensorDescriptor::detection(
      5,
      anchors.len(),
      ElementType::Float32,
      Quantization::IDENTITY,
    );
    (desc, bytes)
  }

  fn close(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-5
  }

  #[test]
  fn absolute_pixel_box_is_normalized() {
    let (desc, bytes) = float_tensor(&[[320.0, 320.0, 64.0, 64.0, 0.8], [0.0, 0.0, 0.0, 0.0, 0.1]]);
    let view = TensorView::new(&desc, &bytes).unwrap();
    let items = decode(&view, &DecodeOptions::default());

    assert_eq!(items.len(), 1);
    let bbox = items[0].bbox;
    assert!(close(bbox.left, 0.45));
    assert!(close(bbox.top, 0.45));
    assert!(close(bbox.right, 0.55));
    assert!(close(bbox.bottom, 0.55));
    assert!(close(items[0].score, 0.8));
    assert_eq!(items[0].label, "object");
  }

  #[test]
  fn threshold_is_strict() {
    let (desc, bytes) = float_tensor(&[
      [0.5, 0.5, 0.1, 0.1, 0.5],
      [0.5, 0.5, 0.1, 0.1, 0.5000001],
      [0.5, 0.5, 0.1, 0.1, 0.4999],
    ]);
    let view = TensorView::new(&desc, &bytes).unwrap();
    let options = DecodeOptions {
      confidence_threshold: 0.5,
      ..DecodeOptions::default()
    };
    let summary = decode_with_summary(&view, &options);
    assert_eq!(summary.items.len(), 1);
    assert!(summary.items[0].score > 0.5);
    assert_eq!(summary.best_score, Some(0.5000001));
  }

  #[test]
  fn heuristic_is_per_field() {
    // x 是像素坐标, 其余字段已经归一化
    let options = DecodeOptions::default();
    let [x, y, w, h] = normalize_coordinates([320.0, 0.5, 0.2, 0.1], &options);
    assert!(close(x, 0.5));
    assert!(close(y, 0.5));
    assert!(close(w, 0.2));
    assert!(close(h, 0.1));

    // 恰好等于界限时不视为像素坐标
    let [x, ..] = normalize_coordinates([10.0, 0.0, 0.0, 0.0], &options);
    assert_eq!(x, 10.0);
  }

  #[test]
  fn per_box_heuristic_divides_every_field() {
    let options = DecodeOptions {
      heuristic: ScaleHeuristic::PerBox,
      coordinate_bound: 5.0,
      ..DecodeOptions::default()
    };
    let [x, y, w, h] = normalize_coordinates([320.0, 3.2, 64.0, 6.4], &options);
    assert!(close(x, 0.5));
    assert!(close(y, 0.005));
    assert!(close(w, 0.1));
    assert!(close(h, 0.01));
  }

  #[test]
  fn output_follows_anchor_order_and_is_not_clamped() {
    let (desc, bytes) = float_tensor(&[
      [0.02, 0.5, 0.1, 0.1, 0.3],
      [0.5, 0.5, 0.2, 0.2, 0.9],
    ]);
    let view = TensorView::new(&desc, &bytes).unwrap();
    let items = decode(&view, &DecodeOptions::default());
    assert_eq!(items.len(), 2);
    assert!(close(items[0].score, 0.3));
    assert!(close(items[1].score, 0.9));
    // 左边界越过 0 时保持原样
    assert!(items[0].bbox.left < 0.0);
  }

  #[test]
  fn quantized_tensor_decodes_through_dequantizer() {
    // scale 0.01, zero_point 0: 50 -> 0.5, 20 -> 0.2, 80 -> 0.8
    let anchors = 2;
    let mut bytes = vec![0u8; 5 * anchors];
    let set = |bytes: &mut Vec<u8>, c: usize, a: usize, v: i8| bytes[c * anchors + a] = v as u8;
    set(&mut bytes, 0, 0, 50);
    set(&mut bytes, 1, 0, 50);
    set(&mut bytes, 2, 0, 20);
    set(&mut bytes, 3, 0, 20);
    set(&mut bytes, 4, 0, 80);
    set(&mut bytes, 4, 1, 10);
    let desc =
      TensorDescriptor::detection(5, anchors, ElementType::Int8, Quantization::new(0.01, 0));
    let view = TensorView::new(&desc, &bytes).unwrap();

    let items = decode(&view, &DecodeOptions::default());
    assert_eq!(items.len(), 1);
    assert!(close(items[0].score, 0.8));
    assert!(close(items[0].bbox.left, 0.4));
    assert!(close(items[0].bbox.right, 0.6));
  }
}
