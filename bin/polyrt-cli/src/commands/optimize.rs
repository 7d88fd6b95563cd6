// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `polyrt optimize`: deployment advice for a bundle on this device.

use runtime::{AutoOptimizer, OptimizeOptions};
use std::path::PathBuf;

pub async fn execute(
    config: &runtime::RuntimeConfig,
    bundle_dir: PathBuf,
    target_latency: Option<f64>,
    memory_budget: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let bundle = super::load_bundle(&bundle_dir)?;
    let memory_budget = memory_budget
        .map(|s| {
            memory_manager::MemoryBudget::parse(&s)
                .map_err(|e| anyhow::anyhow!("invalid budget '{s}': {e}"))
        })
        .transpose()?;

    let options = OptimizeOptions {
        target_latency_ms: target_latency,
        memory_budget,
        ..OptimizeOptions::default()
    };
    let result = AutoOptimizer::new(super::factory(config)?).optimize(&bundle, &options)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    super::banner("Optimizer");
    println!("  Bundle:        {}", bundle.summary());
    println!();

    // ── Recommendation ─────────────────────────────────────────
    println!("  Runtime:       {}", result.recommended_runtime);
    println!("  Quantization:  {}", result.quantization_applied);
    println!("  Compression:   level {}", result.compression_level);
    println!(
        "  Size:          {} -> {} bytes ({:.2}x)",
        result.original_size, result.optimized_size, result.compression_ratio
    );
    println!("  Est. latency:  {:.2} ms", result.estimated_latency_ms);
    if let Some(target) = target_latency {
        let verdict = if result.estimated_latency_ms <= target {
            "meets"
        } else {
            "misses"
        };
        println!("                 {verdict} the {target:.2} ms target");
    }
    println!();

    // ── Decisions ──────────────────────────────────────────────
    println!("  ── Decisions ───────────────────────────────────────");
    for step in &result.transformations {
        println!("  - {step}");
    }

    Ok(())
}
