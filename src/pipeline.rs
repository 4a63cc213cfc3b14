// 该文件是 Xunfeng （巡蜂） 项目的一部分。
// src/pipeline.rs - 检测流水线上下文
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
  config::PipelineConfig,
  frame::{FrameError, Preprocessor, RgbFrame},
  model::{
    DetectItem, InferenceRuntime, InputSpec, ModelError,
    decode::{DecodeOptions, decode_with_summary},
    nms::suppress,
    tensor::{TensorDescriptor, TensorError, TensorView},
  },
  stabilizer::{Stabilized, TemporalStabilizer},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
  pub frames_processed: u64,
  /// 无法解码的输入帧
  pub frames_skipped: u64,
  pub inference_failures: u64,
  pub degenerate_tensors: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
  MalformedFrame,
  InferenceFailed,
}

/// 单帧的检测结果（抑制后，稳定前）
#[derive(Debug, Clone, Default)]
pub struct FrameDetections {
  pub candidates: usize,
  pub items: Vec<DetectItem>,
  pub best_score: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct FrameReport {
  pub frame_index: u64,
  pub candidates: usize,
  pub survivors: usize,
  pub best_score: Option<f32>,
  pub stabilized: Stabilized,
}

#[derive(Debug, Clone)]
pub enum FrameOutcome {
  Processed(FrameReport),
  /// 跳过的帧不更新稳定器，也不影响宽限期
  Skipped(SkipReason),
}

/// 检测流水线
///
/// 持有推理运行时、解码参数和稳定器状态，由唯一的解码工作线程独占。
/// 模型加载失败时进入不可用状态，此后每帧都输出空结果。
pub struct DetectionPipeline {
  model: Option<(Box<dyn InferenceRuntime>, TensorDescriptor)>,
  preprocessor: Preprocessor,
  options: DecodeOptions,
  iou_threshold: f32,
  stabilizer: TemporalStabilizer,
  stats: PipelineStats,
  degenerate_logged: bool,
}

fn report_degenerate(logged: &mut bool, stats: &mut PipelineStats, e: &TensorError) {
  stats.degenerate_tensors += 1;
  if *logged {
    debug!("输出张量形状异常, 按无检测处理: {}", e);
  } else {
    *logged = true;
    warn!("输出张量形状异常, 按无检测处理: {}", e);
  }
}

impl DetectionPipeline {
  pub fn new(
    runtime: Result<Box<dyn InferenceRuntime>, ModelError>,
    config: &PipelineConfig,
  ) -> Self {
    let mut options = config.decode_options();
    let (model, spec) = match runtime {
      Ok(runtime) => {
        let descriptor = runtime.output_descriptor().clone();
        let spec = runtime.input_spec();
        if let Some(size) = runtime.input_size()
          && size != options.input_size
        {
          warn!(
            "配置的输入尺寸 {} 与模型 {} 不一致, 以模型为准",
            options.input_size, size
          );
          options.input_size = size;
        }
        info!(
          "推理运行时 {} 就绪, 输出形状 {:?}, 输入 {:?}",
          runtime.name(),
          descriptor.shape,
          spec
        );
        (Some((runtime, descriptor)), spec)
      }
      Err(e) => {
        error!("模型加载失败, 检测流水线不可用: {}", e);
        (None, InputSpec::default())
      }
    };

    Self {
      model,
      preprocessor: Preprocessor::new(options.input_size, config.resize, spec),
      options,
      iou_threshold: config.iou_threshold,
      stabilizer: TemporalStabilizer::new(config.grace_period()),
      stats: PipelineStats::default(),
      degenerate_logged: false,
    }
  }

  pub fn is_available(&self) -> bool {
    self.model.is_some()
  }

  /// 实际送入模型的输入边长
  pub fn input_size(&self) -> u32 {
    self.options.input_size
  }

  pub fn stats(&self) -> PipelineStats {
    self.stats
  }

  /// 推理、解码并抑制，不经过稳定器
  pub fn detect(&mut self, frame: &RgbFrame) -> Result<FrameDetections, ModelError> {
    let Some((runtime, descriptor)) = self.model.as_mut() else {
      return Ok(FrameDetections::default());
    };

    let input = self.preprocessor.prepare(frame);
    let bytes = runtime.infer(&input)?;
    let view = match TensorView::new(descriptor, bytes) {
      Ok(view) => view,
      Err(e) => {
        report_degenerate(&mut self.degenerate_logged, &mut self.stats, &e);
        return Ok(FrameDetections::default());
      }
    };

    let summary = decode_with_summary(&view, &self.options);
    let candidates = summary.items.len();
    let items = suppress(summary.items, self.iou_threshold);
    Ok(FrameDetections {
      candidates,
      items,
      best_score: summary.best_score,
    })
  }

  pub fn process(&mut self, frame: Result<RgbFrame, FrameError>, now: Instant) -> FrameOutcome {
    let frame = match frame {
      Ok(frame) => frame,
      Err(e) => {
        self.stats.frames_skipped += 1;
        warn!("跳过无法解码的帧: {}", e);
        return FrameOutcome::Skipped(SkipReason::MalformedFrame);
      }
    };

    if !self.is_available() {
      self.stats.frames_processed += 1;
      return FrameOutcome::Processed(FrameReport {
        frame_index: frame.index(),
        candidates: 0,
        survivors: 0,
        best_score: None,
        stabilized: Stabilized::default(),
      });
    }

    let detections = match self.detect(&frame) {
      Ok(detections) => detections,
      Err(e) => {
        self.stats.inference_failures += 1;
        warn!("第 {} 帧推理失败: {}", frame.index(), e);
        return FrameOutcome::Skipped(SkipReason::InferenceFailed);
      }
    };

    self.stats.frames_processed += 1;
    let survivors = detections.items.len();
    let stabilized = self.stabilizer.update(detections.items, now);
    debug!(
      "第 {} 帧: 候选 {} 个, 保留 {} 个, 状态 {:?}, 最高置信度 {:?}",
      frame.index(),
      detections.candidates,
      survivors,
      stabilized.state,
      detections.best_score
    );

    FrameOutcome::Processed(FrameReport {
      frame_index: frame.index(),
      candidates: detections.candidates,
      survivors,
      best_score: detections.best_score,
      stabilized,
    })
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use image::RgbImage;

  use super::*;
  use crate::{
    model::{
      ReplayModel,
      tensor::{ElementType, Quantization},
    },
    stabilizer::StabilizerState,
  };

  fn frame(index: u64) -> RgbFrame {
    RgbFrame::new(index, RgbImage::new(4, 4)).unwrap()
  }

  fn float_bytes(values: &[f32]) -> Box<[u8]> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
  }

  fn config() -> PipelineConfig {
    PipelineConfig {
      input_size: 8,
      ..PipelineConfig::default()
    }
  }

  fn replay(recordings: Vec<Box<[u8]>>, anchors: usize) -> Box<dyn InferenceRuntime> {
    let desc =
      TensorDescriptor::detection(5, anchors, ElementType::Float32, Quantization::IDENTITY);
    Box::new(ReplayModel::new(desc, InputSpec::default(), recordings).unwrap())
  }

  struct FailingRuntime(TensorDescriptor);

  impl InferenceRuntime for FailingRuntime {
    fn name(&self) -> &'static str {
      "failing"
    }

    fn input_spec(&self) -> InputSpec {
      InputSpec::default()
    }

    fn output_descriptor(&self) -> &TensorDescriptor {
      &self.0
    }

    fn infer(&mut self, _input: &[u8]) -> Result<&[u8], ModelError> {
      Err(ModelError::Runtime("busy".to_string()))
    }
  }

  /// 只接受固定输入尺寸的运行时
  struct FixedSizeRuntime {
    size: u32,
    descriptor: TensorDescriptor,
    output: Box<[u8]>,
  }

  impl InferenceRuntime for FixedSizeRuntime {
    fn name(&self) -> &'static str {
      "fixed"
    }

    fn input_spec(&self) -> InputSpec {
      InputSpec::default()
    }

    fn output_descriptor(&self) -> &TensorDescriptor {
      &self.descriptor
    }

    fn input_size(&self) -> Option<u32> {
      Some(self.size)
    }

    fn infer(&mut self, input: &[u8]) -> Result<&[u8], ModelError> {
      let expected = self.size as usize * self.size as usize * 3;
      if input.len() != expected {
        return Err(ModelError::Runtime(format!("输入长度 {}", input.len())));
      }
      Ok(&self.output[..])
    }
  }

  #[test]
  fn runtime_input_size_overrides_config() {
    let runtime = FixedSizeRuntime {
      size: 4,
      descriptor: TensorDescriptor::detection(5, 1, ElementType::Float32, Quantization::IDENTITY),
      // 像素坐标, 按模型边长 4 归一化
      output: float_bytes(&[2.0, 2.0, 2.0, 2.0, 0.9]),
    };
    let config = PipelineConfig {
      input_size: 8,
      coordinate_bound: 1.0,
      ..PipelineConfig::default()
    };
    let mut pipeline = DetectionPipeline::new(Ok(Box::new(runtime)), &config);
    assert_eq!(pipeline.input_size(), 4);

    match pipeline.process(Ok(frame(0)), Instant::now()) {
      FrameOutcome::Processed(report) => {
        let bbox = report.stabilized.items[0].bbox;
        assert!((bbox.left - 0.25).abs() < 1e-6);
        assert!((bbox.right - 0.75).abs() < 1e-6);
      }
      other => panic!("unexpected outcome {other:?}"),
    }
  }

  #[test]
  fn oversized_descriptor_counts_as_empty_frame() {
    let hit = float_bytes(&[0.5, 0.5, 0.1, 0.1, 0.9]);
    let runtime = replay(vec![hit], usize::MAX / 4);
    let mut pipeline = DetectionPipeline::new(Ok(runtime), &config());
    match pipeline.process(Ok(frame(0)), Instant::now()) {
      FrameOutcome::Processed(report) => {
        assert_eq!(report.stabilized.state, StabilizerState::Empty);
      }
      other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(pipeline.stats().degenerate_tensors, 1);
  }

  #[test]
  fn unavailable_model_always_reports_empty() {
    let mut pipeline = DetectionPipeline::new(
      Err(ModelError::MissingParameter("model")),
      &config(),
    );
    assert!(!pipeline.is_available());
    for i in 0..3 {
      match pipeline.process(Ok(frame(i)), Instant::now()) {
        FrameOutcome::Processed(report) => {
          assert_eq!(report.stabilized.state, StabilizerState::Empty);
          assert!(report.stabilized.items.is_empty());
        }
        other => panic!("unexpected outcome {other:?}"),
      }
    }
    assert_eq!(pipeline.stats().frames_processed, 3);
  }

  #[test]
  fn degenerate_tensor_counts_as_empty_frame() {
    let t0 = Instant::now();
    let hit = float_bytes(&[0.5, 0.5, 0.1, 0.1, 0.9]);
    // 长度不足一个锚点
    let short = float_bytes(&[0.5, 0.5]);
    let runtime = replay(vec![hit, short.clone(), short], 1);
    let mut pipeline = DetectionPipeline::new(Ok(runtime), &config());

    let first = pipeline.process(Ok(frame(0)), t0);
    assert!(matches!(
      first,
      FrameOutcome::Processed(ref r) if r.stabilized.state == StabilizerState::Fresh
    ));

    let second = pipeline.process(Ok(frame(1)), t0 + Duration::from_millis(100));
    assert!(matches!(
      second,
      FrameOutcome::Processed(ref r) if r.stabilized.state == StabilizerState::Held
    ));

    let third = pipeline.process(Ok(frame(2)), t0 + Duration::from_millis(400));
    assert!(matches!(
      third,
      FrameOutcome::Processed(ref r) if r.stabilized.state == StabilizerState::Empty
    ));
    assert_eq!(pipeline.stats().degenerate_tensors, 2);
  }

  #[test]
  fn inference_failure_skips_the_frame() {
    let desc = TensorDescriptor::detection(5, 1, ElementType::Float32, Quantization::IDENTITY);
    let mut pipeline = DetectionPipeline::new(Ok(Box::new(FailingRuntime(desc))), &config());
    assert!(matches!(
      pipeline.process(Ok(frame(0)), Instant::now()),
      FrameOutcome::Skipped(SkipReason::InferenceFailed)
    ));
    assert_eq!(pipeline.stats().inference_failures, 1);
    assert_eq!(pipeline.stats().frames_processed, 0);
  }

  #[test]
  fn malformed_frame_is_skipped() {
    let hit = float_bytes(&[0.5, 0.5, 0.1, 0.1, 0.9]);
    let mut pipeline = DetectionPipeline::new(Ok(replay(vec![hit], 1)), &config());
    let outcome = pipeline.process(Err(FrameError::EmptyImage), Instant::now());
    assert!(matches!(outcome, FrameOutcome::Skipped(SkipReason::MalformedFrame)));
    assert_eq!(pipeline.stats().frames_skipped, 1);
  }

  #[test]
  fn detect_suppresses_overlaps() {
    // 两个锚点几乎重合
    let values = [
      0.50, 0.51, // x
      0.50, 0.50, // y
      0.20, 0.20, // w
      0.20, 0.20, // h
      0.70, 0.90, // score
    ];
    let mut pipeline = DetectionPipeline::new(Ok(replay(vec![float_bytes(&values)], 2)), &config());
    let detections = pipeline.detect(&frame(0)).unwrap();
    assert_eq!(detections.candidates, 2);
    assert_eq!(detections.items.len(), 1);
    assert!((detections.items[0].score - 0.9).abs() < 1e-6);
    assert_eq!(detections.best_score, Some(0.9));
  }
}
