// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Advisory deployment optimization.
//!
//! [`AutoOptimizer::optimize`] inspects a bundle and the current device and
//! recommends a runtime, a quantization strategy and a transfer compression
//! level. It never mutates the bundle.

use crate::factory::AdapterFactory;
use crate::RuntimeError;
use device_monitor::{DeviceCapabilities, NetworkKind};
use memory_manager::MemoryBudget;
use model_bundle::{ModelBundle, RuntimeKind};
use std::fmt;

const MB: f64 = 1024.0 * 1024.0;

/// Weight quantization strategies, least aggressive first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Quantization {
    None,
    Fp16,
    MixedPrecision,
    Dynamic,
    Int8,
}

impl Quantization {
    pub const ORDER: [Quantization; 5] = [
        Quantization::None,
        Quantization::Fp16,
        Quantization::MixedPrecision,
        Quantization::Dynamic,
        Quantization::Int8,
    ];

    /// Size of the quantized model relative to the original.
    pub fn size_factor(self) -> f64 {
        match self {
            Quantization::None => 1.0,
            Quantization::Fp16 => 0.5,
            Quantization::MixedPrecision => 0.375,
            Quantization::Dynamic => 0.3,
            Quantization::Int8 => 0.25,
        }
    }

    /// Half-precision formats need GPU arithmetic.
    pub fn needs_gpu(self) -> bool {
        matches!(self, Quantization::Fp16 | Quantization::MixedPrecision)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Quantization::None => "none",
            Quantization::Fp16 => "fp16",
            Quantization::MixedPrecision => "mixed-precision",
            Quantization::Dynamic => "dynamic",
            Quantization::Int8 => "int8",
        }
    }
}

impl fmt::Display for Quantization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct OptimizeOptions {
    /// Desired per-call latency.
    pub target_latency_ms: Option<f64>,
    /// Memory the model may occupy; defaults to the device's available
    /// memory, then to the factory's budget.
    pub memory_budget: Option<MemoryBudget>,
    /// Never recommend quantization.
    pub disable_quantization: bool,
}

/// The recommendation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationResult {
    pub original_size: u64,
    pub optimized_size: u64,
    pub compression_ratio: f64,
    pub estimated_latency_ms: f64,
    pub recommended_runtime: RuntimeKind,
    pub quantization_applied: Quantization,
    /// Transfer compression level, 1 (fast) to 9 (small).
    pub compression_level: u32,
    /// Human-readable list of the decisions taken.
    pub transformations: Vec<String>,
}

/// Per-runtime cost model: fixed call overhead and milliseconds per MB.
fn latency_model(kind: RuntimeKind) -> (f64, f64) {
    match kind {
        RuntimeKind::GpuCompute => (2.0, 0.5),
        RuntimeKind::Graph => (1.0, 2.0),
        RuntimeKind::Tensor => (1.0, 3.0),
        RuntimeKind::Interpreter => (5.0, 8.0),
    }
}

pub fn estimate_latency_ms(kind: RuntimeKind, size_bytes: u64) -> f64 {
    let (overhead, per_mb) = latency_model(kind);
    overhead + size_bytes as f64 / MB * per_mb
}

pub fn compression_level(network: NetworkKind) -> u32 {
    match network {
        NetworkKind::Cellular => 9,
        NetworkKind::Wifi => 6,
        NetworkKind::None | NetworkKind::Ethernet | NetworkKind::Unknown => 3,
    }
}

pub struct AutoOptimizer {
    factory: AdapterFactory,
}

impl AutoOptimizer {
    pub fn new(factory: AdapterFactory) -> Self {
        Self { factory }
    }

    pub fn optimize(
        &self,
        bundle: &ModelBundle,
        options: &OptimizeOptions,
    ) -> Result<OptimizationResult, RuntimeError> {
        let caps = self.factory.capabilities();
        let original_size = bundle.size_bytes();
        let mut transformations = Vec::new();

        let runtime = self.select_runtime(bundle, &caps, options, &mut transformations)?;
        transformations.push(format!("runtime: {runtime}"));

        let budget = self.budget(&caps, options);
        let model_bytes = bundle.model_file().map_or(0, |(_, bytes)| bytes.len() as u64);
        let quantization = if options.disable_quantization || model_bytes == 0 {
            Quantization::None
        } else {
            select_quantization(original_size, model_bytes, budget, runtime)
        };
        let optimized_size =
            original_size - model_bytes + (model_bytes as f64 * quantization.size_factor()) as u64;
        if quantization != Quantization::None {
            transformations.push(format!("quantize: {quantization}"));
        }

        let compression_level = compression_level(caps.network.kind);
        transformations.push(format!("compress: level {compression_level}"));

        let estimated_latency_ms = estimate_latency_ms(runtime, optimized_size);
        if let Some(target) = options.target_latency_ms {
            if estimated_latency_ms > target {
                tracing::warn!(target, estimated_latency_ms, "latency target not reachable");
                transformations.push(format!("latency target {target}ms not met"));
            }
        }

        let result = OptimizationResult {
            original_size,
            optimized_size,
            compression_ratio: if optimized_size == 0 {
                1.0
            } else {
                original_size as f64 / optimized_size as f64
            },
            estimated_latency_ms,
            recommended_runtime: runtime,
            quantization_applied: quantization,
            compression_level,
            transformations,
        };
        tracing::info!(
            bundle = %bundle.name(),
            runtime = %runtime,
            quantization = %quantization,
            ratio = result.compression_ratio,
            "optimization planned"
        );
        Ok(result)
    }

    fn select_runtime(
        &self,
        bundle: &ModelBundle,
        caps: &DeviceCapabilities,
        options: &OptimizeOptions,
        notes: &mut Vec<String>,
    ) -> Result<RuntimeKind, RuntimeError> {
        let mut candidates = self.factory.rank_runtimes(bundle)?;
        let size = bundle.size_bytes();

        if let Some(gpu_memory) = caps.gpu.memory_bytes {
            if size > gpu_memory && candidates.len() > 1 {
                candidates.retain(|kind| *kind != RuntimeKind::GpuCompute);
                notes.push("skip gpu-compute: bundle exceeds GPU memory".into());
            }
        }
        if options.target_latency_ms.is_some()
            && candidates.len() > 1
            && candidates.contains(&RuntimeKind::Interpreter)
        {
            candidates.retain(|kind| *kind != RuntimeKind::Interpreter);
            notes.push("skip interpreter: cold start exceeds latency target".into());
        }

        candidates.first().copied().ok_or_else(|| {
            RuntimeError::validation(format!(
                "no runtime can run bundle '{}' on this device",
                bundle.name()
            ))
        })
    }

    fn budget(&self, caps: &DeviceCapabilities, options: &OptimizeOptions) -> u64 {
        if let Some(budget) = options.memory_budget {
            return budget.as_bytes() as u64;
        }
        if caps.memory.available_bytes > 0 {
            return caps.memory.available_bytes;
        }
        self.factory.options().memory_budget.as_bytes() as u64
    }
}

/// The least aggressive strategy whose result fits half the budget; the
/// most aggressive one when nothing fits.
fn select_quantization(total: u64, model_bytes: u64, budget: u64, runtime: RuntimeKind) -> Quantization {
    let limit = budget / 2;
    let gpu = runtime == RuntimeKind::GpuCompute;
    Quantization::ORDER
        .into_iter()
        .filter(|q| gpu || !q.needs_gpu())
        .find(|q| total - model_bytes + (model_bytes as f64 * q.size_factor()) as u64 <= limit)
        .unwrap_or(Quantization::Int8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterOptions;
    use device_monitor::{GpuInfo, StaticReader};
    use model_bundle::{BundleBuilder, IoSpec};
    use std::sync::Arc;

    fn optimizer(gpu: GpuInfo, network: NetworkKind) -> AutoOptimizer {
        let mut caps = DeviceCapabilities::baseline();
        caps.gpu = gpu;
        caps.network.kind = network;
        let factory = AdapterFactory::new(AdapterOptions::default(), Arc::new(StaticReader::new(caps)));
        AutoOptimizer::new(factory)
    }

    /// A graph bundle with `kb` KiB of initializer padding.
    fn graph_bundle(kb: usize) -> ModelBundle {
        let data = vec!["0.5"; kb * 256].join(",");
        let graph = format!(
            r#"{{"format":"graph-model","inputs":["x"],"outputs":["y"],
                "initializers":{{"w":{{"shape":[{}],"data":[{data}]}}}},
                "nodes":[{{"op":"relu","inputs":["x"],"output":"y"}}]}}"#,
            kb * 256
        );
        BundleBuilder::new("padded", "1.0.0", "auto")
            .model_file("model.graph.json", graph)
            .input(IoSpec::new("x", "float32"))
            .build()
    }

    fn budget_kb(kb: usize) -> OptimizeOptions {
        OptimizeOptions {
            memory_budget: Some(MemoryBudget::from_bytes(kb * 1024)),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_quantization_when_it_fits() {
        let opt = optimizer(GpuInfo::none(), NetworkKind::Ethernet);
        let result = opt.optimize(&graph_bundle(4), &budget_kb(1024)).unwrap();
        assert_eq!(result.recommended_runtime, RuntimeKind::Graph);
        assert_eq!(result.quantization_applied, Quantization::None);
        assert_eq!(result.optimized_size, result.original_size);
        assert_eq!(result.compression_ratio, 1.0);
        assert_eq!(result.compression_level, 3);
    }

    #[test]
    fn test_cpu_runtime_skips_half_precision() {
        let opt = optimizer(GpuInfo::none(), NetworkKind::Wifi);
        let bundle = graph_bundle(8);
        // Half of the budget holds a bit over half the model: fp16 would fit
        // but is GPU-only.
        let size_kb = bundle.size_bytes() as f64 / 1024.0;
        let options = budget_kb((size_kb * 2.0 * 0.55).ceil() as usize);
        let result = opt.optimize(&bundle, &options).unwrap();
        assert_eq!(result.quantization_applied, Quantization::Dynamic);
        assert!(result.compression_ratio > 3.0);
        assert_eq!(result.compression_level, 6);
        assert!(result.transformations.iter().any(|t| t == "quantize: dynamic"));
    }

    #[test]
    fn test_nothing_fits_falls_back_to_int8() {
        let opt = optimizer(GpuInfo::none(), NetworkKind::Cellular);
        let result = opt.optimize(&graph_bundle(8), &budget_kb(1)).unwrap();
        assert_eq!(result.quantization_applied, Quantization::Int8);
        assert_eq!(result.compression_level, 9);
    }

    #[test]
    fn test_code_only_bundle_never_quantized() {
        let opt = optimizer(GpuInfo::none(), NetworkKind::Unknown);
        let bundle = BundleBuilder::new("script", "1.0.0", "auto")
            .code("model.rt", "fn predict(input) = input;")
            .build();
        let result = opt.optimize(&bundle, &budget_kb(0)).unwrap();
        assert_eq!(result.recommended_runtime, RuntimeKind::Interpreter);
        assert_eq!(result.quantization_applied, Quantization::None);
    }

    #[test]
    fn test_gpu_skipped_when_bundle_exceeds_gpu_memory() {
        let bundle = BundleBuilder::new("vadd", "1.0.0", "auto")
            .code("model.rt", "fn predict(input) = input.a + input.b;")
            .input(IoSpec::new("a", "float32"))
            .input(IoSpec::new("b", "float32"))
            .operations(["add"])
            .build();
        let roomy = optimizer(GpuInfo::compute(Some(1 << 30)), NetworkKind::Ethernet);
        assert_eq!(
            roomy.optimize(&bundle, &OptimizeOptions::default()).unwrap().recommended_runtime,
            RuntimeKind::GpuCompute
        );
        let tiny = optimizer(GpuInfo::compute(Some(8)), NetworkKind::Ethernet);
        let result = tiny.optimize(&bundle, &OptimizeOptions::default()).unwrap();
        assert_eq!(result.recommended_runtime, RuntimeKind::Interpreter);
        assert!(result.transformations[0].starts_with("skip gpu-compute"));
    }

    #[test]
    fn test_latency_target_avoids_interpreter() {
        let bundle = BundleBuilder::new("both", "1.0.0", "auto")
            .code("model.rt", "fn predict(input) = relu(input);")
            .model_file(
                "model.graph.json",
                r#"{"inputs":["x"],"outputs":["y"],"nodes":[{"op":"relu","inputs":["x"],"output":"y"}]}"#,
            )
            .build();
        let opt = optimizer(GpuInfo::none(), NetworkKind::Ethernet);
        let options = OptimizeOptions {
            target_latency_ms: Some(10.0),
            ..Default::default()
        };
        assert_eq!(opt.optimize(&bundle, &options).unwrap().recommended_runtime, RuntimeKind::Graph);

        let script = BundleBuilder::new("script", "1.0.0", "auto")
            .code("model.rt", "fn predict(input) = input;")
            .build();
        assert_eq!(
            opt.optimize(&script, &options).unwrap().recommended_runtime,
            RuntimeKind::Interpreter
        );
    }

    #[test]
    fn test_latency_model() {
        assert_eq!(estimate_latency_ms(RuntimeKind::Graph, 1024 * 1024), 3.0);
        assert!(
            estimate_latency_ms(RuntimeKind::Interpreter, 1 << 20)
                > estimate_latency_ms(RuntimeKind::GpuCompute, 1 << 20)
        );
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let opt = optimizer(GpuInfo::none(), NetworkKind::Ethernet);
        let result = opt.optimize(&graph_bundle(1), &OptimizeOptions::default()).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["recommendedRuntime"], "graph");
        assert_eq!(json["quantizationApplied"], "none");
    }
}
