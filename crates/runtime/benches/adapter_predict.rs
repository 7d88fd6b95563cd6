// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for adapter predict latency.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use device_monitor::{DeviceCapabilities, StaticReader};
use model_bundle::{BundleBuilder, IoSpec, ModelBundle, RuntimeKind};
use runtime::{Adapter, AdapterFactory, AdapterOptions, ModelHandle};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::runtime::Runtime;

const GRAPH: &str = r#"{
    "format": "graph-model",
    "inputs": ["x"],
    "outputs": ["y"],
    "initializers": {
        "w": { "shape": [4, 4], "data": [1, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1] },
        "b": { "shape": [4], "data": [0.1, 0.2, 0.3, 0.4] }
    },
    "nodes": [
        { "op": "matmul", "inputs": ["x", "w"], "output": "h" },
        { "op": "add", "inputs": ["h", "b"], "output": "z" },
        { "op": "softmax", "inputs": ["z"], "output": "y" }
    ]
}"#;

fn bundle(kind: RuntimeKind) -> ModelBundle {
    match kind {
        RuntimeKind::Interpreter => BundleBuilder::new("bench", "1.0.0", "interpreter")
            .code("model.rt", "fn predict(input) = softmax(input.x);")
            .input(IoSpec::new("x", "float32"))
            .build(),
        _ => BundleBuilder::new("bench", "1.0.0", kind.as_str())
            .model_file("model.graph.json", GRAPH)
            .input(IoSpec::new("x", "float32").with_shape(vec![-1, 4]))
            .build(),
    }
}

fn input(kind: RuntimeKind) -> Value {
    match kind {
        RuntimeKind::Interpreter => json!([1.0, 2.0, 3.0, 4.0]),
        _ => json!([[1.0, 2.0, 3.0, 4.0]]),
    }
}

fn prepare(rt: &Runtime, kind: RuntimeKind) -> (Arc<dyn Adapter>, ModelHandle) {
    let reader = Arc::new(StaticReader::new(DeviceCapabilities::baseline()));
    let factory = AdapterFactory::new(AdapterOptions::default(), reader);
    rt.block_on(async {
        let adapter = factory.create_adapter(kind, AdapterOptions::default());
        adapter.initialize().await.unwrap();
        let handle = adapter.load(&bundle(kind)).await.unwrap();
        (adapter, handle)
    })
}

fn bench_predict(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("predict");
    for kind in [RuntimeKind::Interpreter, RuntimeKind::Graph, RuntimeKind::Tensor] {
        let (adapter, handle) = prepare(&rt, kind);
        let value = input(kind);
        group.bench_with_input(BenchmarkId::from_parameter(kind), &value, |b, value| {
            b.to_async(&rt)
                .iter(|| async { adapter.predict(&handle, value.clone()).await.unwrap() });
        });
        rt.block_on(adapter.cleanup()).unwrap();
    }
    group.finish();
}

criterion_group!(benches, bench_predict);
criterion_main!(benches);
