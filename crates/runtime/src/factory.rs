// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Adapter construction and runtime selection.
//!
//! # Selection Order
//!
//! ```text
//!   declared runtime ──────────────► only candidate
//!   "auto":
//!     gpu-compute   compute API + (compute program | every operation a kernel)
//!     graph         graph-model file
//!     tensor        layers-model or graph-model file
//!     interpreter   script code
//! ```
//!
//! Capabilities are captured fresh on every query.

use crate::adapter::{Adapter, AdapterOptions};
use crate::adapters::{gpu_adapter, graph_adapter, tensor_adapter, InterpreterAdapter};
use crate::RuntimeError;
use device_monitor::{CapabilityReader, DeviceCapabilities, SystemReader};
use model_bundle::formats::compute::ComputeProgram;
use model_bundle::{ModelBundle, ModelFormat, RuntimeKind};
use std::sync::Arc;

/// Where a pipeline gets its adapters from.
pub trait AdapterSource: Send + Sync {
    /// A fresh, uninitialized adapter of `kind`.
    fn create(&self, kind: RuntimeKind) -> Arc<dyn Adapter>;

    /// The runtime a bundle should run on.
    fn detect(&self, bundle: &ModelBundle) -> Result<RuntimeKind, RuntimeError>;
}

/// Builds adapters and picks runtimes for bundles.
#[derive(Clone)]
pub struct AdapterFactory {
    options: AdapterOptions,
    reader: Arc<dyn CapabilityReader>,
}

impl AdapterFactory {
    pub fn new(options: AdapterOptions, reader: Arc<dyn CapabilityReader>) -> Self {
        Self { options, reader }
    }

    /// A factory reading capabilities from the running system.
    pub fn system(options: AdapterOptions) -> Self {
        Self::new(options, Arc::new(SystemReader::new()))
    }

    pub fn options(&self) -> &AdapterOptions {
        &self.options
    }

    pub fn capabilities(&self) -> DeviceCapabilities {
        self.reader.capture()
    }

    /// A fresh adapter of `kind` constructed with `options`.
    pub fn create_adapter(&self, kind: RuntimeKind, options: AdapterOptions) -> Arc<dyn Adapter> {
        tracing::debug!(runtime = %kind, "creating adapter");
        let reader = Arc::clone(&self.reader);
        match kind {
            RuntimeKind::Interpreter => Arc::new(InterpreterAdapter::new(options)),
            RuntimeKind::Graph => Arc::new(graph_adapter(options, reader)),
            RuntimeKind::Tensor => Arc::new(tensor_adapter(options)),
            RuntimeKind::GpuCompute => Arc::new(gpu_adapter(options, reader)),
        }
    }

    /// Runtimes this device can run, in preference order.
    pub fn supported_runtimes(&self) -> Vec<RuntimeKind> {
        let caps = self.capabilities();
        RuntimeKind::ALL
            .into_iter()
            .filter(|kind| device_supports(*kind, &caps))
            .collect()
    }

    /// Returns `true` if `name` is a runtime tag this device can run.
    pub fn is_runtime_supported(&self, name: &str) -> bool {
        name.parse::<RuntimeKind>()
            .map(|kind| self.supported_runtimes().contains(&kind))
            .unwrap_or(false)
    }

    /// Every runtime that can run `bundle` here, best first.
    pub fn rank_runtimes(&self, bundle: &ModelBundle) -> Result<Vec<RuntimeKind>, RuntimeError> {
        let declared = bundle
            .declared_runtime()
            .map_err(|e| RuntimeError::validation(e.to_string()))?;
        if let Some(kind) = declared {
            return Ok(vec![kind]);
        }
        let caps = self.capabilities();
        Ok(RuntimeKind::ALL
            .into_iter()
            .filter(|kind| device_supports(*kind, &caps) && can_run(*kind, bundle))
            .collect())
    }

    /// The preferred runtime for `bundle`.
    pub fn detect_best_runtime(&self, bundle: &ModelBundle) -> Result<RuntimeKind, RuntimeError> {
        let ranked = self.rank_runtimes(bundle)?;
        let best = ranked.first().copied().ok_or_else(|| {
            RuntimeError::validation(format!(
                "no runtime can run bundle '{}' on this device",
                bundle.name()
            ))
        })?;
        tracing::info!(bundle = %bundle.name(), runtime = %best, candidates = ranked.len(), "runtime selected");
        Ok(best)
    }

    /// A fresh adapter for the preferred runtime of `bundle`.
    pub fn create_best_adapter(&self, bundle: &ModelBundle) -> Result<Arc<dyn Adapter>, RuntimeError> {
        let kind = self.detect_best_runtime(bundle)?;
        Ok(self.create_adapter(kind, self.options.clone()))
    }
}

impl AdapterSource for AdapterFactory {
    fn create(&self, kind: RuntimeKind) -> Arc<dyn Adapter> {
        self.create_adapter(kind, self.options.clone())
    }

    fn detect(&self, bundle: &ModelBundle) -> Result<RuntimeKind, RuntimeError> {
        self.detect_best_runtime(bundle)
    }
}

fn device_supports(kind: RuntimeKind, caps: &DeviceCapabilities) -> bool {
    match kind {
        RuntimeKind::GpuCompute => caps.has_gpu_compute(),
        RuntimeKind::Graph | RuntimeKind::Tensor | RuntimeKind::Interpreter => true,
    }
}

/// Whether the bundle carries a payload `kind` can execute.
pub(crate) fn can_run(kind: RuntimeKind, bundle: &ModelBundle) -> bool {
    let format = bundle.model_format();
    match kind {
        RuntimeKind::GpuCompute => {
            format == Some(ModelFormat::ComputeProgram)
                || ComputeProgram::supports_all(&bundle.manifest().operations)
        }
        RuntimeKind::Graph => format == Some(ModelFormat::GraphModel),
        RuntimeKind::Tensor => matches!(
            format,
            Some(ModelFormat::GraphModel) | Some(ModelFormat::LayersModel)
        ),
        RuntimeKind::Interpreter => bundle.code().is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use device_monitor::{GpuInfo, StaticReader};
    use model_bundle::{BundleBuilder, IoSpec};

    const GRAPH: &str = r#"{
        "format": "graph-model",
        "inputs": ["x"],
        "outputs": ["y"],
        "nodes": [{ "op": "relu", "inputs": ["x"], "output": "y" }]
    }"#;

    fn factory(gpu: GpuInfo) -> AdapterFactory {
        let mut caps = DeviceCapabilities::baseline();
        caps.gpu = gpu;
        AdapterFactory::new(AdapterOptions::default(), Arc::new(StaticReader::new(caps)))
    }

    fn graph_bundle() -> ModelBundle {
        BundleBuilder::new("relu", "1.0.0", "auto")
            .model_file("model.graph.json", GRAPH)
            .input(IoSpec::new("x", "float32"))
            .build()
    }

    #[test]
    fn test_graph_chosen_without_gpu_compute() {
        let f = factory(GpuInfo::none());
        assert_eq!(f.detect_best_runtime(&graph_bundle()).unwrap(), RuntimeKind::Graph);
        assert_eq!(
            f.rank_runtimes(&graph_bundle()).unwrap(),
            vec![RuntimeKind::Graph, RuntimeKind::Tensor]
        );
    }

    #[test]
    fn test_gpu_preferred_for_kernel_operations() {
        let bundle = BundleBuilder::new("vadd", "1.0.0", "auto")
            .code("model.rt", "fn predict(input) = input.a + input.b;")
            .input(IoSpec::new("a", "float32"))
            .input(IoSpec::new("b", "float32"))
            .operations(["add"])
            .build();
        assert_eq!(
            factory(GpuInfo::compute(None)).detect_best_runtime(&bundle).unwrap(),
            RuntimeKind::GpuCompute
        );
        assert_eq!(
            factory(GpuInfo::none()).detect_best_runtime(&bundle).unwrap(),
            RuntimeKind::Interpreter
        );
    }

    #[test]
    fn test_unknown_operation_rules_out_gpu() {
        let bundle = BundleBuilder::new("conv", "1.0.0", "auto")
            .code("model.rt", "fn predict(input) = input;")
            .operations(["add", "conv2d"])
            .build();
        assert_eq!(
            factory(GpuInfo::compute(None)).rank_runtimes(&bundle).unwrap(),
            vec![RuntimeKind::Interpreter]
        );
    }

    #[test]
    fn test_declared_runtime_is_only_candidate() {
        let bundle = BundleBuilder::new("relu", "1.0.0", "tensor")
            .model_file("model.graph.json", GRAPH)
            .build();
        let f = factory(GpuInfo::none());
        assert_eq!(f.rank_runtimes(&bundle).unwrap(), vec![RuntimeKind::Tensor]);
        let adapter = f.create_best_adapter(&bundle).unwrap();
        assert_eq!(adapter.kind(), RuntimeKind::Tensor);
    }

    #[test]
    fn test_nothing_viable_is_validation_error() {
        let bundle = BundleBuilder::new("empty", "1.0.0", "auto")
            .file("notes.txt", "nothing to run")
            .build();
        let err = factory(GpuInfo::none()).detect_best_runtime(&bundle).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn test_supported_runtimes() {
        let f = factory(GpuInfo::none());
        assert_eq!(
            f.supported_runtimes(),
            vec![RuntimeKind::Graph, RuntimeKind::Tensor, RuntimeKind::Interpreter]
        );
        assert!(f.is_runtime_supported("graph"));
        assert!(!f.is_runtime_supported("gpu-compute"));
        assert!(!f.is_runtime_supported("onnx"));
        assert!(factory(GpuInfo::compute(None)).is_runtime_supported("gpu"));
    }

    #[test]
    fn test_created_adapters_are_distinct() {
        let f = factory(GpuInfo::none());
        let a = f.create(RuntimeKind::Interpreter);
        let b = f.create(RuntimeKind::Interpreter);
        assert_eq!(a.kind(), RuntimeKind::Interpreter);
        assert_ne!(a.id(), b.id());
    }
}
