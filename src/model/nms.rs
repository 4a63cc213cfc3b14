// 该文件是 Xunfeng （巡蜂） 项目的一部分。
// src/model/nms.rs - 非极大值抑制
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use crate::model::{BBox, DetectItem};

/// 计算两个边界框的 IoU，结果总在 [0, 1] 内
pub fn iou(a: &BBox, b: &BBox) -> f32 {
  let inter_w = a.right.min(b.right) - a.left.max(b.left);
  let inter_h = a.bottom.min(b.bottom) - a.top.max(b.top);
  if inter_w <= 0.0 || inter_h <= 0.0 {
    return 0.0;
  }

  let intersection = inter_w * inter_h;
  let union = a.area() + b.area() - intersection;
  if union > 0.0 {
    (intersection / union).clamp(0.0, 1.0)
  } else {
    0.0
  }
}

/// 贪心非极大值抑制
///
/// 按置信度降序依次接受候选框，丢弃与已接受框 IoU 严格大于阈值的候选框。
/// 排序是稳定的，置信度相同的候选框保持输入顺序。
pub fn suppress(mut items: Vec<DetectItem>, iou_threshold: f32) -> Vec<DetectItem> {
  items.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<DetectItem> = Vec::with_capacity(items.len());
  for item in items {
    let overlapped = kept
      .iter()
      .any(|best| iou(&best.bbox, &item.bbox) > iou_threshold);
    if !overlapped {
      kept.push(item);
    }
  }
  kept
}
