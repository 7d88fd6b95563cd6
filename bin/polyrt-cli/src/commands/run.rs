// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `polyrt run`: load one bundle and run a single prediction.

use runtime::{Adapter, Progress};
use std::path::PathBuf;
use std::time::Instant;

pub async fn execute(
    config: &runtime::RuntimeConfig,
    bundle_dir: PathBuf,
    input: String,
    runtime_name: Option<String>,
) -> anyhow::Result<()> {
    super::banner("Run");

    let bundle = super::load_bundle(&bundle_dir)?;
    let input = super::parse_input(&input)?;
    println!("  Bundle:  {}", bundle.summary());

    let options = config
        .adapter_options()?
        .with_progress(|p: &Progress| tracing::info!(stage = %p.stage, fraction = p.fraction, "progress"));
    let factory = runtime::AdapterFactory::system(options.clone());

    // ── Runtime Selection ──────────────────────────────────────
    let kind = match runtime_name {
        Some(name) => name.parse().map_err(|e| anyhow::anyhow!("--runtime: {e}"))?,
        None => match config.default_runtime_kind()? {
            Some(kind) => kind,
            None => factory.detect_best_runtime(&bundle)?,
        },
    };
    println!("  Runtime: {kind}");
    println!();

    let adapter = factory.create_adapter(kind, options);

    // ── Lifecycle ──────────────────────────────────────────────
    let start = Instant::now();
    adapter.initialize().await?;
    let init_ms = start.elapsed().as_secs_f64() * 1000.0;

    let start = Instant::now();
    let handle = adapter.load(&bundle).await?;
    let load_ms = start.elapsed().as_secs_f64() * 1000.0;

    let start = Instant::now();
    let result = adapter.predict(&handle, input).await;
    let predict_ms = start.elapsed().as_secs_f64() * 1000.0;

    adapter.unload(&handle).await?;
    adapter.cleanup().await?;
    let output = result?;

    // ── Output ─────────────────────────────────────────────────
    println!("  Output:");
    for line in serde_json::to_string_pretty(&output)?.lines() {
        println!("    {line}");
    }
    println!();
    println!("  ── Timing ──────────────────────────────────────────");
    println!("  Initialize:  {init_ms:>9.2} ms");
    println!("  Load:        {load_ms:>9.2} ms");
    println!("  Predict:     {predict_ms:>9.2} ms");

    Ok(())
}
