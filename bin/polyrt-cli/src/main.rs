// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # polyrt
//!
//! Command-line interface for the polyrt runtime.
//!
//! ## Usage
//! ```bash
//! # Run one prediction
//! polyrt run --bundle ./bundles/scaler --input '{"x": [1, 2, 0.5]}'
//!
//! # Inspect a bundle and the runtimes that could run it
//! polyrt inspect --bundle ./bundles/scaler
//!
//! # Deployment advice for this device
//! polyrt optimize --bundle ./bundles/scaler --target-latency 10
//!
//! # Device capabilities
//! polyrt status
//!
//! # Compare predict latency across runtimes
//! polyrt benchmark --bundle ./bundles/projection --input '[[1, 2, 3]]' --iterations 200
//! ```

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "polyrt",
    about = "Run model bundles on interchangeable execution backends",
    version,
    author
)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a bundle and run one prediction.
    Run {
        /// Path to the bundle directory.
        #[arg(short, long)]
        bundle: PathBuf,

        /// Input as JSON text, or `@path` to read it from a file.
        #[arg(short, long)]
        input: String,

        /// Runtime to use instead of automatic selection.
        #[arg(short, long)]
        runtime: Option<String>,
    },

    /// Print a bundle's manifest, integrity and candidate runtimes.
    Inspect {
        #[arg(short, long)]
        bundle: PathBuf,
    },

    /// Recommend a runtime, quantization and compression for this device.
    Optimize {
        #[arg(short, long)]
        bundle: PathBuf,

        /// Desired per-call latency in milliseconds.
        #[arg(long)]
        target_latency: Option<f64>,

        /// Memory the model may occupy (e.g., "256M").
        #[arg(short = 'm', long)]
        memory_budget: Option<String>,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Display device capabilities and the runtimes they allow.
    Status,

    /// Measure predict latency on every runtime that can run the bundle.
    Benchmark {
        #[arg(short, long)]
        bundle: PathBuf,

        /// Input as JSON text, or `@path` to read it from a file.
        #[arg(short, long)]
        input: String,

        /// Timed predictions per runtime.
        #[arg(long, default_value_t = 100)]
        iterations: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    commands::init_tracing(cli.verbose);
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            bundle,
            input,
            runtime,
        } => commands::run::execute(&config, bundle, input, runtime).await,
        Commands::Inspect { bundle } => commands::inspect::execute(&config, bundle).await,
        Commands::Optimize {
            bundle,
            target_latency,
            memory_budget,
            json,
        } => commands::optimize::execute(&config, bundle, target_latency, memory_budget, json).await,
        Commands::Status => commands::status::execute(&config).await,
        Commands::Benchmark {
            bundle,
            input,
            iterations,
        } => commands::benchmark::execute(&config, bundle, input, iterations).await,
    }
}
