// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runtime configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! default_runtime = "graph"
//! request_timeout_ms = 30000
//! init_timeout_ms = 60000
//! memory_budget = "512M"
//! workgroup_size = 64
//! gpu_device = "auto"
//! packages = ["math"]
//!
//! [pipeline]
//! error_handling = "retry"
//! retry_attempts = 3
//! retry_delay_ms = 100
//! cache_enabled = true
//! max_cache_size = 100
//! ```
//!
//! Every key is optional; missing keys take the defaults shown above.

use crate::adapter::AdapterOptions;
use crate::adapters::gpu::DeviceSelection;
use crate::pipeline::PipelineConfig;
use crate::RuntimeError;
use memory_manager::MemoryBudget;
use model_bundle::RuntimeKind;
use std::path::Path;
use std::time::Duration;

/// Configuration for adapters and pipelines.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Runtime tag used when the caller does not pick one; `None` means
    /// automatic selection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_runtime: Option<String>,
    /// Deadline for each worker request in milliseconds.
    pub request_timeout_ms: u64,
    /// Deadline for backend initialization in milliseconds.
    pub init_timeout_ms: u64,
    /// Memory budget for pooled buffers (human-readable, e.g., `"512M"`).
    pub memory_budget: String,
    /// Default compute workgroup size.
    pub workgroup_size: u32,
    /// `"auto"` opens a hardware GPU adapter when present; `"software"`
    /// always uses the CPU device.
    pub gpu_device: DeviceSelection,
    /// Packages made available to scripts.
    pub packages: Vec<String>,
    pub pipeline: PipelineConfig,
}

impl RuntimeConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::config(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, RuntimeError> {
        toml::from_str(toml_str)
            .map_err(|e| RuntimeError::config(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, RuntimeError> {
        toml::to_string_pretty(self)
            .map_err(|e| RuntimeError::config(format!("TOML serialise error: {e}")))
    }

    /// Parses the memory budget string into a [`MemoryBudget`].
    pub fn parse_budget(&self) -> Result<MemoryBudget, RuntimeError> {
        MemoryBudget::parse(&self.memory_budget)
            .map_err(|e| RuntimeError::config(format!("invalid budget: {e}")))
    }

    /// The configured default runtime, if one is set.
    pub fn default_runtime_kind(&self) -> Result<Option<RuntimeKind>, RuntimeError> {
        match self.default_runtime.as_deref() {
            None => Ok(None),
            Some(tag) if tag.trim().eq_ignore_ascii_case("auto") => Ok(None),
            Some(tag) => tag
                .parse()
                .map(Some)
                .map_err(|e| RuntimeError::config(format!("default_runtime: {e}"))),
        }
    }

    /// Builds the options every adapter is constructed with.
    pub fn adapter_options(&self) -> Result<AdapterOptions, RuntimeError> {
        if self.workgroup_size == 0 {
            return Err(RuntimeError::config("workgroup_size must be at least 1"));
        }
        Ok(AdapterOptions {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            init_timeout: Duration::from_millis(self.init_timeout_ms),
            memory_budget: self.parse_budget()?,
            workgroup_size: self.workgroup_size,
            gpu_device: self.gpu_device,
            packages: self.packages.clone(),
            progress: None,
        })
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        self.pipeline.clone()
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_runtime: None,
            request_timeout_ms: 30_000,
            init_timeout_ms: 60_000,
            memory_budget: "512M".to_string(),
            workgroup_size: 64,
            gpu_device: DeviceSelection::Auto,
            packages: Vec::new(),
            pipeline: PipelineConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ErrorHandling;
    use crate::ErrorKind;

    #[test]
    fn test_default() {
        let c = RuntimeConfig::default();
        assert_eq!(c.memory_budget, "512M");
        assert_eq!(c.workgroup_size, 64);
        assert_eq!(c.pipeline.retry_attempts, 3);
        assert!(c.pipeline.cache_enabled);
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
default_runtime = "tensor"
memory_budget = "1G"
request_timeout_ms = 500
gpu_device = "software"

[pipeline]
error_handling = "continue"
max_cache_size = 4
"#;
        let c = RuntimeConfig::from_toml(toml).unwrap();
        assert_eq!(c.default_runtime_kind().unwrap(), Some(RuntimeKind::Tensor));
        assert_eq!(c.parse_budget().unwrap().as_mb(), 1024);
        assert_eq!(c.pipeline.error_handling, ErrorHandling::Continue);
        assert_eq!(c.pipeline.max_cache_size, 4);
        assert_eq!(c.pipeline.retry_delay_ms, 100);
        assert_eq!(c.init_timeout_ms, 60_000);

        let opts = c.adapter_options().unwrap();
        assert_eq!(opts.request_timeout, Duration::from_millis(500));
        assert_eq!(opts.gpu_device, DeviceSelection::Software);
        assert_eq!(RuntimeConfig::default().gpu_device, DeviceSelection::Auto);
    }

    #[test]
    fn test_to_toml_roundtrip() {
        let c = RuntimeConfig {
            default_runtime: Some("graph".into()),
            packages: vec!["math".into()],
            ..Default::default()
        };
        let toml = c.to_toml().unwrap();
        let back = RuntimeConfig::from_toml(&toml).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_invalid_values() {
        let c = RuntimeConfig {
            memory_budget: "lots".into(),
            ..Default::default()
        };
        let err = c.adapter_options().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.message.starts_with("configuration:"));

        let c = RuntimeConfig {
            default_runtime: Some("onnx".into()),
            ..Default::default()
        };
        assert!(c.default_runtime_kind().is_err());
        assert_eq!(
            RuntimeConfig::from_toml("default_runtime = \"auto\"")
                .unwrap()
                .default_runtime_kind()
                .unwrap(),
            None
        );
    }
}
