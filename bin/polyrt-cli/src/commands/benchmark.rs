// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `polyrt benchmark`: predict latency on every runtime that can run a bundle.
//!
//! Each candidate runtime gets its own adapter. After a warm-up call the
//! bundle is predicted `iterations` times and the latency distribution is
//! printed as a comparison table.

use model_bundle::{ModelBundle, RuntimeKind};
use runtime::{Adapter, AdapterFactory};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Instant;

struct BenchResult {
    kind: RuntimeKind,
    load_ms: f64,
    mean_ms: f64,
    p50_ms: f64,
    p95_ms: f64,
}

pub async fn execute(
    config: &runtime::RuntimeConfig,
    bundle_dir: PathBuf,
    input: String,
    iterations: usize,
) -> anyhow::Result<()> {
    super::banner("Benchmark Suite");
    anyhow::ensure!(iterations > 0, "--iterations must be at least 1");

    let bundle = super::load_bundle(&bundle_dir)?;
    let input = super::parse_input(&input)?;
    let factory = super::factory(config)?;

    let candidates = factory.rank_runtimes(&bundle)?;
    anyhow::ensure!(
        !candidates.is_empty(),
        "no runtime on this device can run '{}'",
        bundle.name()
    );

    println!("  Bundle:      {}", bundle.summary());
    println!("  Iterations:  {iterations}");
    println!();

    // ── Results Table ──────────────────────────────────────────
    println!(
        "  {:<14} {:>10} {:>10} {:>10} {:>10}",
        "Runtime", "Load ms", "Mean ms", "p50 ms", "p95 ms",
    );
    println!("  {}", "-".repeat(58));

    let mut results = Vec::new();
    for kind in candidates {
        match run_single(&factory, kind, &bundle, &input, iterations).await {
            Ok(r) => {
                println!(
                    "  {:<14} {:>10.2} {:>10.3} {:>10.3} {:>10.3}",
                    r.kind.as_str(),
                    r.load_ms,
                    r.mean_ms,
                    r.p50_ms,
                    r.p95_ms,
                );
                results.push(r);
            }
            Err(e) => {
                tracing::warn!(runtime = %kind, error = %e, "benchmark run failed");
                println!("  {:<14} {:>10}", kind.as_str(), "FAILED");
            }
        }
    }
    println!();

    if let Some(best) = results
        .iter()
        .min_by(|a, b| a.mean_ms.total_cmp(&b.mean_ms))
    {
        println!("  Fastest: {} ({:.3} ms mean)", best.kind, best.mean_ms);
    }

    Ok(())
}

async fn run_single(
    factory: &AdapterFactory,
    kind: RuntimeKind,
    bundle: &ModelBundle,
    input: &Value,
    iterations: usize,
) -> anyhow::Result<BenchResult> {
    let adapter = factory.create_adapter(kind, factory.options().clone());
    let result = measure(adapter.as_ref(), kind, bundle, input, iterations).await;
    adapter.cleanup().await?;
    result
}

async fn measure(
    adapter: &dyn Adapter,
    kind: RuntimeKind,
    bundle: &ModelBundle,
    input: &Value,
    iterations: usize,
) -> anyhow::Result<BenchResult> {
    adapter.initialize().await?;

    let start = Instant::now();
    let handle = adapter.load(bundle).await?;
    let load_ms = start.elapsed().as_secs_f64() * 1000.0;

    // Warm-up.
    adapter.predict(&handle, input.clone()).await?;

    let mut samples = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        let start = Instant::now();
        adapter.predict(&handle, input.clone()).await?;
        samples.push(start.elapsed().as_secs_f64() * 1000.0);
    }
    adapter.unload(&handle).await?;

    samples.sort_by(f64::total_cmp);
    let mean_ms = samples.iter().sum::<f64>() / samples.len() as f64;
    Ok(BenchResult {
        kind,
        load_ms,
        mean_ms,
        p50_ms: percentile(&samples, 0.50),
        p95_ms: percentile(&samples, 0.95),
    })
}

/// Nearest-rank percentile of sorted samples.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
