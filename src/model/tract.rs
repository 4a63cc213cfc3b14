// 该文件是 Xunfeng （巡蜂） 项目的一部分。
// src/model/tract.rs - ONNX 推理运行时
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use tracing::{debug, info};
use tract_onnx::prelude::*;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{
    InferenceRuntime, InputSpec, ModelError, TensorLayout,
    tensor::{ElementType, Quantization, TensorDescriptor},
  },
  query_value,
};

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>>;

/// 基于 tract 的 ONNX 运行时，输入为 NCHW float32，输出为 float32 张量
pub struct TractModel {
  plan: Plan,
  input_size: u32,
  descriptor: TensorDescriptor,
  output: Vec<u8>,
}

fn runtime_error<E: std::fmt::Display>(e: E) -> ModelError {
  ModelError::Runtime(e.to_string())
}

impl FromUrlWithScheme for TractModel {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for TractModel {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::SchemeMismatch {
        expected: Self::SCHEME,
        actual: url.scheme().to_string(),
      });
    }

    let input_size: u32 = query_value(url, "input_size")?.unwrap_or(640);
    let side = input_size as usize;
    let model_path = url.path();
    info!("加载 ONNX 模型: {}", model_path);

    let plan = tract_onnx::onnx()
      .model_for_path(model_path)
      .map_err(runtime_error)?
      .with_input_fact(
        0,
        InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
      )
      .map_err(runtime_error)?
      .into_optimized()
      .map_err(runtime_error)?
      .into_runnable()
      .map_err(runtime_error)?;

    let fact = plan.model().output_fact(0).map_err(runtime_error)?;
    let shape = fact
      .shape
      .as_concrete()
      .ok_or(ModelError::MissingParameter("output shape"))?
      .to_vec();
    debug!("ONNX 输出形状: {:?}", shape);

    let descriptor = TensorDescriptor::new(shape, ElementType::Float32, Quantization::IDENTITY);
    descriptor.validate()?;
    info!("ONNX 模型加载完成");
    Ok(Self {
      plan,
      input_size,
      descriptor,
      output: Vec::new(),
    })
  }
}

impl InferenceRuntime for TractModel {
  fn name(&self) -> &'static str {
    "tract"
  }

  fn input_spec(&self) -> InputSpec {
    InputSpec {
      layout: TensorLayout::Nchw,
      element_type: ElementType::Float32,
    }
  }

  fn output_descriptor(&self) -> &TensorDescriptor {
    &self.descriptor
  }

  fn input_size(&self) -> Option<u32> {
    Some(self.input_size)
  }

  fn infer(&mut self, input: &[u8]) -> Result<&[u8], ModelError> {
    let floats: Vec<f32> = input
      .chunks_exact(4)
      .map(|word| f32::from_ne_bytes([word[0], word[1], word[2], word[3]]))
      .collect();
    let size = self.input_size as usize;
    let array = tract_ndarray::Array4::from_shape_vec((1, 3, size, size), floats)
      .map_err(runtime_error)?;

    let inputs: TVec<TValue> = tvec![array.into_tensor().into()];
    let outputs = self.plan.run(inputs).map_err(runtime_error)?;
    let output = outputs
      .first()
      .ok_or_else(|| ModelError::Runtime("模型没有输出".to_string()))?;
    let values = output.as_slice::<f32>().map_err(runtime_error)?;

    self.output.clear();
    self.output.extend(values.iter().flat_map(|v| v.to_ne_bytes()));
    Ok(&self.output)
  }
}
