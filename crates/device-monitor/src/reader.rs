// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Capability readers.

use crate::capabilities::now_ms;
use crate::{battery, cpu, gpu, memory, network};
use crate::{DeviceCapabilities, GpuKind, MemoryInfo, PlatformInfo};
use std::path::{Path, PathBuf};

/// Environment variable that declares the GPU API class (`none`, `shader`
/// or `compute`), overriding detection.
pub const GPU_OVERRIDE_ENV: &str = "POLYRT_GPU";

/// Source of device capability snapshots.
///
/// Implementations must produce a fresh snapshot on every call.
pub trait CapabilityReader: Send + Sync {
    fn capture(&self) -> DeviceCapabilities;
}

/// Reads capabilities from procfs/sysfs.
#[derive(Debug, Clone)]
pub struct SystemReader {
    root: PathBuf,
    gpu_override: Option<GpuKind>,
}

impl SystemReader {
    /// A reader for the running host. Honours [`GPU_OVERRIDE_ENV`].
    pub fn new() -> Self {
        let gpu_override = std::env::var(GPU_OVERRIDE_ENV).ok().and_then(|value| {
            value
                .parse()
                .map_err(|e: String| tracing::warn!(env = GPU_OVERRIDE_ENV, "{e}"))
                .ok()
        });
        Self {
            root: PathBuf::from("/"),
            gpu_override,
        }
    }

    /// A reader reading files under `root` instead of `/`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            gpu_override: None,
        }
    }

    /// Declares the GPU API class instead of detecting it.
    pub fn with_gpu(mut self, kind: GpuKind) -> Self {
        self.gpu_override = Some(kind);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Default for SystemReader {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityReader for SystemReader {
    fn capture(&self) -> DeviceCapabilities {
        let memory = memory::read_memory(&self.root).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "memory info unavailable");
            MemoryInfo {
                total_bytes: 0,
                available_bytes: 0,
            }
        });
        let caps = DeviceCapabilities {
            platform: PlatformInfo::current(),
            gpu: gpu::read_gpu(&self.root, self.gpu_override),
            cpu: cpu::read_cpu(&self.root),
            memory,
            network: network::read_network(&self.root),
            battery: battery::read_battery(&self.root),
            timestamp_ms: now_ms(),
        };
        tracing::debug!(summary = %caps.summary(), "captured device capabilities");
        caps
    }
}

/// Returns a fixed snapshot, re-stamped on each capture.
#[derive(Debug, Clone)]
pub struct StaticReader(DeviceCapabilities);

impl StaticReader {
    pub fn new(caps: DeviceCapabilities) -> Self {
        Self(caps)
    }
}

impl CapabilityReader for StaticReader {
    fn capture(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            timestamp_ms: now_ms(),
            ..self.0.clone()
        }
    }
}
