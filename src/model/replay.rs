// 该文件是 Xunfeng （巡蜂） 项目的一部分。
// src/model/replay.rs - 回放已记录的输出张量
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{
    InferenceRuntime, InputSpec, ModelError, TensorLayout,
    tensor::{ElementType, MIN_CHANNELS, Quantization, TensorDescriptor},
  },
  query_value,
};

/// 回放运行时
///
/// 从磁盘读取原始输出张量（单个文件或目录下按文件名排序的多个文件），
/// 每次推理依次返回下一份记录，到末尾后循环。输入内容被忽略。
///
/// URL 形如 `replay:///path/to/dump?type=int8&scale=0.0039&zero_point=-128&anchors=8400`。
#[derive(Debug)]
pub struct ReplayModel {
  descriptor: TensorDescriptor,
  input_spec: InputSpec,
  recordings: Vec<Box<[u8]>>,
  cursor: usize,
}

impl ReplayModel {
  pub fn new(
    descriptor: TensorDescriptor,
    input_spec: InputSpec,
    recordings: Vec<Box<[u8]>>,
  ) -> Result<Self, ModelError> {
    if recordings.is_empty() {
      return Err(ModelError::NoRecordings("<memory>".to_string()));
    }
    Ok(Self {
      descriptor,
      input_spec,
      recordings,
      cursor: 0,
    })
  }

  pub fn len(&self) -> usize {
    self.recordings.len()
  }

  pub fn is_empty(&self) -> bool {
    self.recordings.is_empty()
  }
}

fn collect_recordings(path: &Path) -> Result<Vec<PathBuf>, ModelError> {
  if !path.is_dir() {
    return Ok(vec![path.to_path_buf()]);
  }

  let mut files = Vec::new();
  for entry in std::fs::read_dir(path)? {
    let entry = entry?;
    if entry.file_type()?.is_file() {
      files.push(entry.path());
    }
  }
  files.sort();
  Ok(files)
}

impl FromUrlWithScheme for ReplayModel {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayModel {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::SchemeMismatch {
        expected: Self::SCHEME,
        actual: url.scheme().to_string(),
      });
    }

    let element_type: ElementType = query_value(url, "type")?.unwrap_or(ElementType::Int8);
    let scale: f32 = query_value(url, "scale")?.unwrap_or(1.0);
    let zero_point: i32 = query_value(url, "zero_point")?.unwrap_or(0);
    let channels: usize = query_value(url, "channels")?.unwrap_or(MIN_CHANNELS);
    let anchors: Option<usize> = query_value(url, "anchors")?;
    let input_spec = InputSpec {
      element_type: query_value(url, "input_type")?.unwrap_or(ElementType::Int8),
      layout: query_value(url, "layout")?.unwrap_or(TensorLayout::Nhwc),
    };

    let path = Path::new(url.path());
    info!("加载回放张量: {}", path.display());
    let files = collect_recordings(path)?;
    let mut recordings = Vec::with_capacity(files.len());
    for file in &files {
      let data = std::fs::read(file)?;
      debug!("回放张量 {} 大小 {} 字节", file.display(), data.len());
      recordings.push(data.into_boxed_slice());
    }
    if recordings.is_empty() {
      return Err(ModelError::NoRecordings(path.display().to_string()));
    }

    let anchors = match anchors {
      Some(anchors) => anchors,
      None => {
        let inferred = match channels.checked_mul(element_type.size()) {
          Some(per_anchor) if per_anchor > 0 => recordings[0].len() / per_anchor,
          _ => 0,
        };
        debug!("未指定锚点数量, 按文件长度推断为 {}", inferred);
        inferred
      }
    };

    let descriptor = TensorDescriptor::detection(
      channels,
      anchors,
      element_type,
      Quantization::new(scale, zero_point),
    );
    if let Err(e) = descriptor.validate() {
      // 形状问题留给流水线逐帧处理
      warn!("回放张量描述无效: {}", e);
    }

    info!(
      "回放模型就绪: {} 份记录, 形状 {:?}, 类型 {:?}",
      recordings.len(),
      descriptor.shape,
      descriptor.element_type
    );
    Ok(Self {
      descriptor,
      input_spec,
      recordings,
      cursor: 0,
    })
  }
}

impl InferenceRuntime for ReplayModel {
  fn name(&self) -> &'static str {
    "replay"
  }

  fn input_spec(&self) -> InputSpec {
    self.input_spec
  }

  fn output_descriptor(&self) -> &TensorDescriptor {
    &self.descriptor
  }

  fn infer(&mut self, input: &[u8]) -> Result<&[u8], ModelError> {
    let index = self.cursor;
    self.cursor = (self.cursor + 1) % self.recordings.len();
    debug!("回放第 {} 份记录 (输入 {} 字节)", index, input.len());
    Ok(&self.recordings[index])
  }
}
