// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `polyrt inspect`: manifest, integrity and candidate runtimes of a bundle.

use model_bundle::{ModelBundle, ModelFormat};
use std::path::PathBuf;

pub async fn execute(config: &runtime::RuntimeConfig, bundle_dir: PathBuf) -> anyhow::Result<()> {
    super::banner("Bundle Inspector");

    let bundle = super::load_bundle(&bundle_dir)?;
    let manifest = bundle.manifest();

    // ── Manifest ───────────────────────────────────────────────
    println!("  Name:        {}", manifest.name);
    println!("  Version:     {}", manifest.version);
    println!("  Runtime:     {}", manifest.runtime);
    if let Some(entrypoint) = &manifest.entrypoint {
        println!("  Entrypoint:  {entrypoint} ({})", manifest.entry_function);
    }
    if !manifest.dependencies.is_empty() {
        println!("  Packages:    {}", manifest.dependencies.join(", "));
    }
    if !manifest.operations.is_empty() {
        println!("  Operations:  {}", manifest.operations.join(", "));
    }
    println!("  Size:        {} bytes", bundle.size_bytes());
    println!();

    print_io("Inputs", bundle.inputs());
    print_io("Outputs", bundle.outputs());

    // ── Files ──────────────────────────────────────────────────
    println!("  ── Files ───────────────────────────────────────────");
    for (name, record) in &manifest.files {
        let format = ModelFormat::detect(name, bundle.file(name).unwrap_or_default())
            .map(|f| f.as_str())
            .unwrap_or("data");
        let marker = if manifest.model_file.as_deref() == Some(name.as_str()) {
            "*"
        } else {
            " "
        };
        println!("  {marker} {name:<32} {:>10} B  {format}", record.size);
    }
    println!();

    // ── Integrity ──────────────────────────────────────────────
    match bundle.verify() {
        Ok(()) => println!("  Integrity:   ok"),
        Err(e) => println!("  Integrity:   FAILED ({e})"),
    }

    // ── Runtimes ───────────────────────────────────────────────
    let factory = super::factory(config)?;
    print_runtimes(&factory, &bundle);
    Ok(())
}

fn print_io(title: &str, specs: &[model_bundle::IoSpec]) {
    if specs.is_empty() {
        return;
    }
    println!("  ── {title} ──────────────────────────────────────────");
    for spec in specs {
        let shape = spec
            .shape
            .as_ref()
            .map(|s| format!("{s:?}"))
            .unwrap_or_else(|| "any".to_string());
        let optional = if spec.optional { " (optional)" } else { "" };
        println!("  {:<16} {:<8} {shape}{optional}", spec.name, spec.dtype);
    }
    println!();
}

fn print_runtimes(factory: &runtime::AdapterFactory, bundle: &ModelBundle) {
    match factory.rank_runtimes(bundle) {
        Ok(ranked) if !ranked.is_empty() => {
            let names: Vec<&str> = ranked.iter().map(|k| k.as_str()).collect();
            println!("  Candidates:  {}", names.join(" > "));
        }
        Ok(_) => println!("  Candidates:  none on this device"),
        Err(e) => println!("  Candidates:  {e}"),
    }
}
