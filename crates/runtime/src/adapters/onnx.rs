// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! ONNX models on ONNX Runtime, used by the graph adapter for `.onnx`
//! model files.
//!
//! Each [`ExecutionProvider`] maps onto an ort execution provider; the CPU
//! provider is always registered last so unsupported nodes fall back.

use super::exec::{lookup, spec_for};
use super::graph::ExecutionProvider;
use crate::RuntimeError;
use model_bundle::IoSpec;
use ndarray::{ArrayD, IxDyn};
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider as _};
use ort::session::builder::SessionBuilder;
use ort::session::Session;
use ort::value::{DynValue, Value as OrtValue};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use tensor_core::{to_json, DType, Shape, Tensor, TensorView};

fn ort_error(context: &str, err: impl std::fmt::Display) -> RuntimeError {
    let text = err.to_string();
    RuntimeError::execution(format!("{context}: {text}")).with_native(text)
}

/// Registers the ort provider for `provider`, then CPU.
fn register(builder: &mut SessionBuilder, provider: ExecutionProvider) -> Result<ExecutionProvider, RuntimeError> {
    let mut used = ExecutionProvider::Cpu;
    if provider == ExecutionProvider::GpuCompute {
        let cuda = CUDAExecutionProvider::default();
        match cuda.is_available() {
            Ok(true) => {
                cuda.register(builder)
                    .map_err(|e| ort_error("registering CUDA provider", e))?;
                used = ExecutionProvider::GpuCompute;
            }
            _ => tracing::warn!("CUDA execution provider unavailable, using CPU"),
        }
    }
    CPUExecutionProvider::default()
        .register(builder)
        .map_err(|e| ort_error("registering CPU provider", e))?;
    Ok(used)
}

/// A committed ort session and its IO names.
pub struct OnnxModel {
    session: Mutex<Session>,
    inputs: Vec<String>,
    outputs: Vec<String>,
    provider: ExecutionProvider,
}

impl OnnxModel {
    pub fn load(bytes: &[u8], provider: ExecutionProvider) -> Result<Self, RuntimeError> {
        let mut builder = Session::builder().map_err(|e| ort_error("creating ort session builder", e))?;
        let provider = register(&mut builder, provider)?;
        let session = builder.commit_from_memory(bytes).map_err(|e| {
            let text = e.to_string();
            RuntimeError::loading(format!("invalid ONNX model: {text}")).with_native(text)
        })?;
        let inputs = session.inputs.iter().map(|i| i.name.clone()).collect();
        let outputs = session.outputs.iter().map(|o| o.name.clone()).collect();
        tracing::debug!(%provider, ?inputs, ?outputs, "ONNX session committed");
        Ok(Self {
            session: Mutex::new(session),
            inputs,
            outputs,
            provider,
        })
    }

    /// The provider the session actually runs on.
    pub fn provider(&self) -> ExecutionProvider {
        self.provider
    }

    pub fn run(&self, inputs: &Map<String, Value>, specs: &[IoSpec]) -> Result<Value, RuntimeError> {
        let mut feeds: HashMap<String, DynValue> = HashMap::with_capacity(self.inputs.len());
        for name in &self.inputs {
            let value = lookup(inputs, name)?;
            let declared = spec_for(specs, name).and_then(|s| s.shape.as_deref());
            let tensor = Tensor::from_json(value, DType::F32, declared)
                .map_err(|e| RuntimeError::validation(format!("input '{name}': {e}")))?;
            let array = ArrayD::<f32>::from_shape_vec(IxDyn(tensor.shape().dims()), tensor.into_vec())
                .map_err(|e| RuntimeError::validation(format!("input '{name}': {e}")))?;
            let value = OrtValue::from_array(array)
                .map_err(|e| ort_error("creating ONNX input", e))?
                .into_dyn();
            feeds.insert(name.clone(), value);
        }

        let mut session = self
            .session
            .lock()
            .map_err(|_| RuntimeError::execution("ONNX session lock poisoned"))?;
        let outputs = session.run(feeds).map_err(|e| ort_error("ONNX inference failed", e))?;

        let mut object = Map::new();
        for name in &self.outputs {
            let tensor = outputs
                .get(name)
                .ok_or_else(|| RuntimeError::execution(format!("ONNX output '{name}' missing")))?;
            let (shape, data) = tensor
                .try_extract_tensor::<f32>()
                .map_err(|e| ort_error(&format!("output '{name}' is not float32"), e))?;
            let dims = shape.iter().map(|&d| d.max(0) as usize).collect();
            let shape = Shape::new(dims);
            let view = TensorView::from_parts(&shape, DType::F32, data)?;
            object.insert(name.clone(), to_json(&view));
        }
        if object.len() == 1 {
            return Ok(object.into_iter().next().map_or(Value::Null, |(_, only)| only));
        }
        Ok(Value::Object(object))
    }
}
