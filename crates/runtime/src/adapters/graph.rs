// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Graph-inference runtime over precompiled operator graphs.
//!
//! # Execution Providers
//! A session runs on the first provider, in preference order, that the
//! device exposes and this build carries kernels for:
//!
//! ```text
//! GpuCompute ─▶ GpuShader ─▶ Cpu
//! ```
//!
//! Operator graphs (`*.graph.json`) run on the built-in CPU kernels
//! whatever the provider. With the `onnx` feature, `.onnx` model files run
//! on ONNX Runtime and the provider maps onto an ort execution provider:
//!
//! | provider     | ort execution provider   |
//! |--------------|--------------------------|
//! | `GpuCompute` | CUDA, then CPU           |
//! | `GpuShader`  | none (not built)         |
//! | `Cpu`        | CPU                      |

use super::exec::PreparedGraph;
use crate::adapter::{AdapterOptions, Backend, ManagedAdapter};
use crate::RuntimeError;
use device_monitor::{CapabilityReader, DeviceCapabilities};
use model_bundle::formats::GraphModel;
use model_bundle::{IoSpec, ModelBundle, RuntimeKind};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Where graph nodes execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionProvider {
    GpuCompute,
    GpuShader,
    Cpu,
}

impl ExecutionProvider {
    pub const PREFERENCE: [ExecutionProvider; 3] = [
        ExecutionProvider::GpuCompute,
        ExecutionProvider::GpuShader,
        ExecutionProvider::Cpu,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionProvider::GpuCompute => "gpu-compute",
            ExecutionProvider::GpuShader => "gpu-shader",
            ExecutionProvider::Cpu => "cpu",
        }
    }

    pub fn available_on(self, caps: &DeviceCapabilities) -> bool {
        match self {
            ExecutionProvider::GpuCompute => caps.has_gpu_compute(),
            ExecutionProvider::GpuShader => caps.has_gpu_shader(),
            ExecutionProvider::Cpu => true,
        }
    }

    /// Whether this build carries kernels for the provider.
    pub fn is_built(self) -> bool {
        match self {
            ExecutionProvider::GpuCompute => cfg!(feature = "onnx"),
            ExecutionProvider::GpuShader => false,
            ExecutionProvider::Cpu => true,
        }
    }

    /// Picks the first usable provider.
    pub fn select(caps: &DeviceCapabilities) -> ExecutionProvider {
        for provider in Self::PREFERENCE {
            if !provider.available_on(caps) {
                continue;
            }
            if provider.is_built() {
                return provider;
            }
            tracing::debug!(provider = provider.as_str(), "provider available but not built, skipping");
        }
        ExecutionProvider::Cpu
    }
}

impl fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A graph-inference session.
pub struct GraphSession {
    provider: ExecutionProvider,
    runs: AtomicU64,
}

impl GraphSession {
    pub fn provider(&self) -> ExecutionProvider {
        self.provider
    }

    /// Inferences executed by this session.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }
}

enum GraphProgram {
    Native(PreparedGraph),
    #[cfg(feature = "onnx")]
    Onnx(super::onnx::OnnxModel),
}

pub struct GraphModelState {
    program: GraphProgram,
    inputs: Vec<IoSpec>,
}

impl GraphModelState {
    /// Where this model's nodes execute.
    pub fn provider(&self) -> ExecutionProvider {
        match &self.program {
            GraphProgram::Native(_) => ExecutionProvider::Cpu,
            #[cfg(feature = "onnx")]
            GraphProgram::Onnx(model) => model.provider(),
        }
    }
}

#[cfg(feature = "onnx")]
fn load_onnx(session: &GraphSession, bytes: &[u8]) -> Result<GraphProgram, RuntimeError> {
    Ok(GraphProgram::Onnx(super::onnx::OnnxModel::load(bytes, session.provider)?))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx(_session: &GraphSession, _bytes: &[u8]) -> Result<GraphProgram, RuntimeError> {
    Err(RuntimeError::loading("ONNX models need a build with the `onnx` feature"))
}

pub struct GraphBackend {
    reader: Arc<dyn CapabilityReader>,
}

impl GraphBackend {
    pub fn new(reader: Arc<dyn CapabilityReader>) -> Self {
        Self { reader }
    }
}

impl Backend for GraphBackend {
    type Session = GraphSession;
    type Model = GraphModelState;

    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Graph
    }

    fn initialize(&self) -> Result<GraphSession, RuntimeError> {
        let caps = self.reader.capture();
        let provider = ExecutionProvider::select(&caps);
        tracing::info!(%provider, "graph session created");
        Ok(GraphSession {
            provider,
            runs: AtomicU64::new(0),
        })
    }

    fn load(&self, session: &GraphSession, bundle: &ModelBundle) -> Result<GraphModelState, RuntimeError> {
        let (name, bytes) = bundle.model_file().ok_or_else(|| {
            RuntimeError::loading(format!("bundle '{}' has no model file", bundle.name()))
        })?;
        if name.ends_with(".onnx") {
            return Ok(GraphModelState {
                program: load_onnx(session, bytes)?,
                inputs: bundle.inputs().to_vec(),
            });
        }
        let graph = GraphModel::parse(bytes)?.validate()?;
        tracing::debug!(
            file = name,
            nodes = graph.nodes.len(),
            initializer_bytes = graph.initializer_bytes(),
            "graph parsed"
        );
        if session.provider != ExecutionProvider::Cpu {
            tracing::debug!(provider = %session.provider, "operator graph runs on CPU kernels");
        }
        Ok(GraphModelState {
            program: GraphProgram::Native(PreparedGraph::new(graph)?),
            inputs: bundle.inputs().to_vec(),
        })
    }

    fn predict(
        &self,
        session: &GraphSession,
        model: &GraphModelState,
        inputs: &Map<String, Value>,
    ) -> Result<Value, RuntimeError> {
        let output = match &model.program {
            GraphProgram::Native(graph) => {
                let mut alloc = |len: usize| Ok::<_, RuntimeError>(vec![0.0f32; len]);
                graph.run(inputs, &model.inputs, &mut alloc)?
            }
            #[cfg(feature = "onnx")]
            GraphProgram::Onnx(onnx) => onnx.run(inputs, &model.inputs)?,
        };
        session.runs.fetch_add(1, Ordering::Relaxed);
        Ok(output)
    }
}

pub type GraphAdapter = ManagedAdapter<GraphBackend>;

/// A graph adapter whose provider is chosen from `reader`.
pub fn graph_adapter(options: AdapterOptions, reader: Arc<dyn CapabilityReader>) -> GraphAdapter {
    ManagedAdapter::new(GraphBackend::new(reader), options)
}
