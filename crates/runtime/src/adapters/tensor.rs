// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor-graph runtime with pooled intermediates.
//!
//! Every tensor a prediction touches, inputs included, is drawn from the
//! session's [`BufferPool`] and handed back before the prediction returns.
//! The pool is checked after every run: a live buffer at that point is a
//! leak and fails the call.

use super::exec::{PreparedGraph, PreparedLayers};
use crate::adapter::{AdapterOptions, Backend, ManagedAdapter};
use crate::RuntimeError;
use memory_manager::{AllocationScope, AllocationStats, BufferPool, BufferUsage, MemoryBudget};
use model_bundle::formats::{GraphModel, LayersModel};
use model_bundle::{IoSpec, ModelBundle, ModelFormat, RuntimeKind};
use serde_json::{Map, Value};

/// Per-adapter tensor session owning the buffer pool.
pub struct TensorSession {
    pool: BufferPool,
}

impl TensorSession {
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn stats(&self) -> AllocationStats {
        self.pool.stats()
    }
}

enum Program {
    Layers(PreparedLayers),
    Graph(PreparedGraph),
}

pub struct TensorModel {
    program: Program,
    format: ModelFormat,
    inputs: Vec<IoSpec>,
}

impl TensorModel {
    pub fn format(&self) -> ModelFormat {
        self.format
    }
}

pub struct TensorBackend {
    budget: MemoryBudget,
}

impl TensorBackend {
    pub fn new(budget: MemoryBudget) -> Self {
        Self { budget }
    }
}

impl Backend for TensorBackend {
    type Session = TensorSession;
    type Model = TensorModel;

    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Tensor
    }

    fn initialize(&self) -> Result<TensorSession, RuntimeError> {
        tracing::info!(budget = %self.budget, "tensor session created");
        Ok(TensorSession {
            pool: BufferPool::new(self.budget),
        })
    }

    fn load(&self, _session: &TensorSession, bundle: &ModelBundle) -> Result<TensorModel, RuntimeError> {
        let (name, bytes) = bundle.model_file().ok_or_else(|| {
            RuntimeError::loading(format!("bundle '{}' has no model file", bundle.name()))
        })?;
        let format = ModelFormat::detect(name, bytes).ok_or_else(|| {
            RuntimeError::loading(format!("'{name}' is neither a layers nor a graph model"))
        })?;
        let program = match format {
            ModelFormat::LayersModel => {
                let model = LayersModel::parse(bytes)?;
                tracing::debug!(
                    layers = model.layers.len(),
                    parameters = model.parameter_count(),
                    "layers model parsed"
                );
                Program::Layers(PreparedLayers::new(&model)?)
            }
            ModelFormat::GraphModel => {
                let graph = GraphModel::parse(bytes)?.validate()?;
                tracing::debug!(nodes = graph.nodes.len(), "graph model parsed");
                Program::Graph(PreparedGraph::new(graph)?)
            }
            ModelFormat::ComputeProgram => {
                return Err(RuntimeError::loading(format!(
                    "'{name}' is a compute program; the tensor runtime runs layers or graph models"
                )))
            }
        };
        Ok(TensorModel {
            program,
            format,
            inputs: bundle.inputs().to_vec(),
        })
    }

    fn predict(
        &self,
        session: &TensorSession,
        model: &TensorModel,
        inputs: &Map<String, Value>,
    ) -> Result<Value, RuntimeError> {
        let scope = session.pool.scope();
        let mut alloc = |len: usize| {
            scope
                .allocate(len, BufferUsage::STORAGE)
                .map_err(RuntimeError::from)
        };
        let result = match &model.program {
            Program::Layers(layers) => layers.run(inputs, &model.inputs, &mut alloc),
            Program::Graph(graph) => graph.run(inputs, &model.inputs, &mut alloc),
        };
        check_released(&scope)?;
        result
    }

    fn unload(&self, session: &TensorSession, _model: &TensorModel) {
        session.pool.shrink();
    }
}

/// Fails when `scope` still has live buffers, after reclaiming them.
fn check_released(scope: &AllocationScope) -> Result<(), RuntimeError> {
    let leaked = scope.live_buffers();
    if leaked == 0 {
        return Ok(());
    }
    tracing::error!(leaked, "tensor buffers still live after predict");
    let reclaimed = scope.reclaim();
    tracing::warn!(reclaimed, "leaked tensor buffers returned to the pool");
    Err(RuntimeError::execution(format!(
        "{leaked} tensor buffer(s) not released after predict"
    )))
}

pub type TensorAdapter = ManagedAdapter<TensorBackend>;

pub fn tensor_adapter(options: AdapterOptions) -> TensorAdapter {
    let budget = options.memory_budget;
    ManagedAdapter::new(TensorBackend::new(budget), options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Adapter;
    use crate::ErrorKind;
    use model_bundle::BundleBuilder;
    use serde_json::json;

    const MLP: &str = r#"{
        "format": "layers-model",
        "input": "features",
        "layers": [
            { "type": "dense", "units": 2, "weights": [[1, 0], [0, 1]], "bias": [1, 1], "activation": "relu" },
            { "type": "softmax" }
        ]
    }"#;

    fn bundle(model: &str) -> ModelBundle {
        BundleBuilder::new("mlp", "1.0.0", "tensor")
            .model_file("model.json", model)
            .input(IoSpec::new("features", "float32").with_shape(vec![-1, 2]))
            .build()
    }

    #[test]
    fn test_leaked_buffers_reclaimed_after_error() {
        let pool = BufferPool::new(MemoryBudget::from_bytes(1024));
        let scope = pool.scope();
        let held = scope.allocate(200, BufferUsage::STORAGE).unwrap();
        drop(scope.allocate(8, BufferUsage::STORAGE).unwrap());

        let err = check_released(&scope).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Execution);
        assert!(err.message.starts_with("1 tensor buffer(s)"));
        assert_eq!(pool.live_buffers(), 0);
        assert!(pool.allocate(200, BufferUsage::STORAGE).is_ok());

        drop(held);
        assert_eq!(pool.allocated_bytes(), 0);
        assert!(check_released(&pool.scope()).is_ok());
    }

    #[tokio::test]
    async fn test_layers_predict_leaves_pool_empty() {
        let adapter = tensor_adapter(AdapterOptions::default());
        adapter.initialize().await.unwrap();
        let handle = adapter.load(&bundle(MLP)).await.unwrap();

        let out = adapter.predict(&handle, json!([[1, 1]])).await.unwrap();
        assert_eq!(out, json!([[0.5, 0.5]]));

        let session = adapter.session().unwrap();
        assert_eq!(session.pool().live_buffers(), 0);
        let stats = session.stats();
        assert!(stats.total_allocations >= 4);

        // A second run reuses pooled storage.
        adapter.predict(&handle, json!([[2, 2]])).await.unwrap();
        assert!(session.stats().cache_hits > 0);
    }

    #[tokio::test]
    async fn test_graph_format_detected() {
        let adapter = tensor_adapter(AdapterOptions::default());
        adapter.initialize().await.unwrap();
        let graph = r#"{"format":"graph-model","inputs":["features"],"outputs":["y"],
            "nodes":[{"op":"sum","inputs":["features"],"output":"y"}]}"#;
        let handle = adapter.load(&bundle(graph)).await.unwrap();
        assert_eq!(adapter.predict(&handle, json!([[1, 2]])).await.unwrap(), json!(3.0));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_is_memory_error() {
        let options = AdapterOptions::default().with_memory_budget(MemoryBudget::from_bytes(16));
        let adapter = tensor_adapter(options);
        adapter.initialize().await.unwrap();
        let handle = adapter.load(&bundle(MLP)).await.unwrap();
        let err = adapter
            .predict(&handle, json!([[1, 1], [1, 1], [1, 1]]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Memory);
        assert_eq!(adapter.session().unwrap().pool().live_buffers(), 0);
    }

    #[tokio::test]
    async fn test_compute_program_rejected() {
        let adapter = tensor_adapter(AdapterOptions::default());
        adapter.initialize().await.unwrap();
        let program = r#"{"format":"compute-program","inputs":["a"],"output":"o",
            "stages":[{"op":"relu","inputs":["a"],"output":"o"}]}"#;
        let err = adapter.load(&bundle(program)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Loading);
    }
}
