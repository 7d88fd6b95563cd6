// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: bundles through adapters, the factory and pipelines.
//!
//! These exercise the public surface only, the way a host application
//! would use it.

use device_monitor::{CapabilityReader, DeviceCapabilities, GpuInfo, StaticReader};
use futures::future::join_all;
use model_bundle::{BundleBuilder, BundleLoader, IoSpec, ModelBundle, RuntimeKind};
use runtime::adapters::{gpu_adapter, ComputeDevice, InterpreterAdapter};
use runtime::{
    Adapter, AdapterFactory, AdapterOptions, AdapterSource, CancellationToken, ErrorHandling,
    ErrorKind, Pipeline, PipelineConfig, PipelineStage, RuntimeStatus,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ── Helpers ────────────────────────────────────────────────────

fn reader(gpu: GpuInfo) -> Arc<dyn CapabilityReader> {
    let mut caps = DeviceCapabilities::baseline();
    caps.gpu = gpu;
    Arc::new(StaticReader::new(caps))
}

fn factory(gpu: GpuInfo) -> AdapterFactory {
    AdapterFactory::new(AdapterOptions::default(), reader(gpu))
}

/// Scenario A: `sum(x) * 0.5`.
fn scaler() -> ModelBundle {
    BundleBuilder::new("scaler", "1.0.0", "interpreter")
        .code("model.rt", "fn predict(input) = sum(input.x) * 0.5;")
        .input(IoSpec::new("x", "float32").with_shape(vec![3]))
        .output(IoSpec::new("y", "float32"))
        .build()
}

/// Scenario B: elementwise add over two arrays.
fn vector_add() -> ModelBundle {
    BundleBuilder::new("vadd", "1.0.0", "auto")
        .input(IoSpec::new("a", "float32"))
        .input(IoSpec::new("b", "float32"))
        .output(IoSpec::new("sum", "float32"))
        .operations(["add"])
        .build()
}

/// Scenario C: a `[?, 3] x [3, 1]` projection as an operator graph.
fn projection() -> ModelBundle {
    let graph = r#"{
        "format": "graph-model",
        "inputs": ["x"],
        "outputs": ["y"],
        "initializers": { "w": { "shape": [3, 1], "data": [0.5, 0.5, 0.5] } },
        "nodes": [{ "op": "matmul", "inputs": ["x", "w"], "output": "y" }]
    }"#;
    BundleBuilder::new("projection", "1.0.0", "auto")
        .model_file("model.graph.json", graph)
        .input(IoSpec::new("x", "float32").with_shape(vec![-1, 3]))
        .output(IoSpec::new("y", "float32"))
        .build()
}

async fn ready_interpreter() -> InterpreterAdapter {
    let adapter = InterpreterAdapter::new(AdapterOptions::default());
    adapter.initialize().await.unwrap();
    adapter
}

// ── Scenarios ──────────────────────────────────────────────────

#[tokio::test]
async fn test_scenario_a_interpreter_scaled_sum() {
    let f = factory(GpuInfo::none());
    let bundle = scaler();
    let adapter = f.create_best_adapter(&bundle).unwrap();
    assert_eq!(adapter.kind(), RuntimeKind::Interpreter);

    adapter.initialize().await.unwrap();
    let handle = adapter.load(&bundle).await.unwrap();
    let out = adapter.predict(&handle, json!({ "x": [1.0, 2.0, 0.5] })).await.unwrap();
    assert_eq!(out, json!(1.75));
    assert_eq!(adapter.status(), RuntimeStatus::Ready);
    adapter.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_scenario_b_gpu_vector_add() {
    let f = factory(GpuInfo::compute(Some(1 << 30)));
    let bundle = vector_add();
    assert_eq!(f.detect_best_runtime(&bundle).unwrap(), RuntimeKind::GpuCompute);

    let adapter = gpu_adapter(AdapterOptions::default().with_workgroup_size(64), reader(GpuInfo::compute(None)));
    adapter.initialize().await.unwrap();
    let handle = adapter.load(&bundle).await.unwrap();

    let a: Vec<f32> = (0..128).map(|i| i as f32).collect();
    let b: Vec<f32> = (0..128).map(|i| 2.0 * i as f32).collect();
    let out = adapter.predict(&handle, json!({ "a": a, "b": b })).await.unwrap();

    let values = out.as_array().unwrap();
    assert_eq!(values.len(), 128);
    for (i, v) in values.iter().enumerate() {
        assert_eq!(v.as_f64().unwrap(), 3.0 * i as f64);
    }
    let stats = adapter.session().unwrap().device().stats();
    assert_eq!(stats.dispatches, 1);
    assert_eq!(stats.workgroups, 2);
}

#[tokio::test]
async fn test_scenario_c_graph_without_gpu_compute() {
    let f = factory(GpuInfo::none());
    let bundle = projection();
    assert_eq!(f.detect_best_runtime(&bundle).unwrap(), RuntimeKind::Graph);

    let adapter = f.create_best_adapter(&bundle).unwrap();
    adapter.initialize().await.unwrap();
    let handle = adapter.load(&bundle).await.unwrap();
    let out = adapter.predict(&handle, json!([[1.0, 2.0, 3.0], [2.0, 2.0, 2.0]])).await.unwrap();
    assert_eq!(out, json!([[3.0], [3.0]]));
}

// ── Bundles ────────────────────────────────────────────────────

#[tokio::test]
async fn test_bundle_from_directory_runs() {
    let dir = tempfile::tempdir().unwrap();
    BundleLoader::write_dir(&projection(), dir.path()).unwrap();
    let bundle = BundleLoader::from_dir(dir.path()).unwrap();

    let adapter = factory(GpuInfo::none()).create(RuntimeKind::Tensor);
    adapter.initialize().await.unwrap();
    let handle = adapter.load(&bundle).await.unwrap();
    let out = adapter.predict(&handle, json!([[2.0, 2.0, 2.0]])).await.unwrap();
    assert_eq!(out, json!([[3.0]]));
}

#[tokio::test]
async fn test_tampered_bundle_rejected() {
    let bundle = scaler();
    let tampered = ModelBundle::from_parts(
        bundle.manifest().clone(),
        Some("fn predict(input) = 42;".to_string()),
        bundle.files().clone(),
    );
    let adapter = ready_interpreter().await;
    let err = adapter.load(&tampered).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert_eq!(adapter.status(), RuntimeStatus::Error);
    assert_eq!(adapter.last_error().unwrap().kind, ErrorKind::Validation);

    // Still usable with a good bundle.
    let handle = adapter.load(&bundle).await.unwrap();
    assert_eq!(adapter.predict(&handle, json!([2, 2, 2])).await.unwrap(), json!(3));
}

#[tokio::test]
async fn test_wrong_runtime_rejected() {
    let adapter = factory(GpuInfo::none()).create(RuntimeKind::Graph);
    adapter.initialize().await.unwrap();
    let err = adapter.load(&scaler()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
}

// ── Adapter Contract ───────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_initialize_sends_one_init() {
    let adapter = InterpreterAdapter::new(AdapterOptions::default());
    let results = join_all((0..5).map(|_| adapter.initialize())).await;
    assert!(results.iter().all(Result::is_ok));
    let status = adapter.worker_status().await.unwrap();
    assert_eq!(status["initCount"], json!(1));
}

#[tokio::test]
async fn test_concurrent_predicts_are_queued() {
    let adapter = ready_interpreter().await;
    let handle = adapter.load(&scaler()).await.unwrap();
    let inputs: Vec<Value> = (0..8).map(|i| json!([i, i, i])).collect();
    let results = join_all(inputs.into_iter().map(|input| adapter.predict(&handle, input))).await;
    for (i, result) in results.into_iter().enumerate() {
        let expected = 1.5 * i as f64;
        assert_eq!(result.unwrap().as_f64().unwrap(), expected);
    }
}

#[tokio::test]
async fn test_foreign_handle_rejected() {
    let a = ready_interpreter().await;
    let b = ready_interpreter().await;
    let handle = a.load(&scaler()).await.unwrap();
    let err = b.predict(&handle, json!([1, 2, 3])).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
}

#[tokio::test]
async fn test_lifecycle_errors() {
    let adapter = InterpreterAdapter::new(AdapterOptions::default());
    let err = adapter.load(&scaler()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Lifecycle);

    adapter.initialize().await.unwrap();
    adapter.cleanup().await.unwrap();
    assert_eq!(adapter.status(), RuntimeStatus::Terminated);
    assert_eq!(adapter.initialize().await.unwrap_err().kind, ErrorKind::Lifecycle);
    assert_eq!(adapter.load(&scaler()).await.unwrap_err().kind, ErrorKind::Lifecycle);
}

#[tokio::test]
async fn test_invalid_input_is_validation_error() {
    let adapter = ready_interpreter().await;
    let handle = adapter.load(&scaler()).await.unwrap();
    let err = adapter.predict(&handle, json!({ "z": [1, 2, 3] })).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    // The handle survives.
    assert_eq!(adapter.predict(&handle, json!([1, 1, 2])).await.unwrap(), json!(2));
}

#[tokio::test]
async fn test_load_reports_progress() {
    let events = Arc::new(AtomicUsize::new(0));
    let last = Arc::new(std::sync::Mutex::new(0.0f32));
    let options = {
        let events = Arc::clone(&events);
        let last = Arc::clone(&last);
        AdapterOptions::default().with_progress(move |p| {
            events.fetch_add(1, Ordering::SeqCst);
            *last.lock().unwrap() = p.fraction;
        })
    };
    let adapter = InterpreterAdapter::new(options);
    adapter.initialize().await.unwrap();
    adapter.load(&scaler()).await.unwrap();
    assert!(events.load(Ordering::SeqCst) >= 3);
    assert_eq!(*last.lock().unwrap(), 1.0);
}

#[tokio::test]
async fn test_cancelled_load_releases_model() {
    let adapter = ready_interpreter().await;
    let slow = BundleBuilder::new("slow", "1.0.0", "interpreter")
        .code(
            "model.rt",
            "fn fib(n) = if n < 2 then n else fib(n - 1) + fib(n - 2);\n\
             let table = fib(25);\n\
             fn predict(input) = table;",
        )
        .build();
    let token = CancellationToken::new();
    let (result, _) = tokio::join!(adapter.load_with_cancel(&slow, &token), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
    });
    assert_eq!(result.unwrap_err().kind, ErrorKind::Cancelled);

    // Queued behind the cancelled load, which is released before this runs.
    let handle = adapter.load(&scaler()).await.unwrap();
    let status = adapter.worker_status().await.unwrap();
    assert_eq!(status["models"], json!([format!("model-{}", handle.id())]));
}

// ── Pipelines ──────────────────────────────────────────────────

#[tokio::test]
async fn test_pipeline_mixes_runtimes() {
    let f = Arc::new(factory(GpuInfo::none()));
    let to_rows = BundleBuilder::new("rows", "1.0.0", "interpreter")
        .code("model.rt", "fn predict(input) = [input, input];")
        .build();
    let stages = vec![
        PipelineStage::new("rows", to_rows),
        PipelineStage::new("project", projection()),
        PipelineStage::new("total", scaler_over("sum(input) * 2")),
    ];
    let pipeline = Pipeline::new(stages, PipelineConfig::default(), f as Arc<dyn AdapterSource>);
    pipeline.initialize().await.unwrap();

    let result = pipeline.process(json!([1.0, 1.0, 2.0])).await.unwrap();
    assert_eq!(result.output, json!(8));
    assert_eq!(result.metadata.stage_timings.len(), 3);

    let again = pipeline.process(json!([1.0, 1.0, 2.0])).await.unwrap();
    assert_eq!(again.metadata.cache_hits, 3);
    pipeline.cleanup().await.unwrap();
}

fn scaler_over(body: &str) -> ModelBundle {
    BundleBuilder::new("total", "1.0.0", "interpreter")
        .code("model.rt", format!("fn predict(input) = {body};"))
        .build()
}

#[tokio::test]
async fn test_pipeline_continue_records_errors() {
    let stages = vec![
        PipelineStage::new("fails", scaler_over("error(\"nope\")")),
        PipelineStage::new("echo", scaler_over("input")),
    ];
    let config = PipelineConfig {
        error_handling: ErrorHandling::Continue,
        ..Default::default()
    };
    let pipeline = Pipeline::new(stages, config, Arc::new(factory(GpuInfo::none())));
    pipeline.initialize().await.unwrap();

    let result = pipeline.process(json!(4)).await.unwrap();
    assert_eq!(result.output, Value::Null);
    assert_eq!(result.metadata.errors.len(), 1);
    assert!(result.metadata.errors[0].contains("nope"));
}
