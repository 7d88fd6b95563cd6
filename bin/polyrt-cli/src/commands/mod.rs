// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Subcommand implementations and the helpers they share.

pub mod benchmark;
pub mod inspect;
pub mod optimize;
pub mod run;
pub mod status;

use anyhow::Context;
use runtime::{AdapterFactory, RuntimeConfig};
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` wins over `-v`.
pub fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Reads the configuration file, or falls back to defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<RuntimeConfig> {
    match path {
        Some(path) => {
            let config = RuntimeConfig::from_file(path)?;
            tracing::info!(path = %path.display(), "configuration loaded");
            Ok(config)
        }
        None => Ok(RuntimeConfig::default()),
    }
}

/// A factory probing the live device with the configured adapter options.
pub fn factory(config: &RuntimeConfig) -> anyhow::Result<AdapterFactory> {
    Ok(AdapterFactory::system(config.adapter_options()?))
}

/// Reads a bundle directory.
pub fn load_bundle(dir: &Path) -> anyhow::Result<model_bundle::ModelBundle> {
    model_bundle::BundleLoader::from_dir(dir)
        .with_context(|| format!("cannot read bundle '{}'", dir.display()))
}

/// Parses `--input`: inline JSON, or `@path` naming a JSON file.
pub fn parse_input(arg: &str) -> anyhow::Result<serde_json::Value> {
    let text = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("cannot read input file '{path}'"))?,
        None => arg.to_string(),
    };
    serde_json::from_str(&text).context("input is not valid JSON")
}

/// Prints the boxed banner every command opens with.
pub fn banner(title: &str) {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║ {:<52} ║", format!("polyrt · {title}"));
    println!("╚══════════════════════════════════════════════════════╝");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inline_input() {
        let value = parse_input(r#"{"x": [1, 2]}"#).unwrap();
        assert_eq!(value["x"][1], 2);
    }

    #[test]
    fn test_parse_input_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.json");
        std::fs::write(&path, "[[1.5]]").unwrap();
        let value = parse_input(&format!("@{}", path.display())).unwrap();
        assert_eq!(value[0][0], 1.5);
    }

    #[test]
    fn test_parse_input_rejects_garbage() {
        assert!(parse_input("{not json").is_err());
        assert!(parse_input("@/nonexistent/input.json").is_err());
    }

    #[test]
    fn test_missing_config_file_is_error() {
        assert!(load_config(Some(Path::new("/nonexistent/polyrt.toml"))).is_err());
        assert_eq!(load_config(None).unwrap(), RuntimeConfig::default());
    }
}
