// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The capability snapshot.

use std::time::{SystemTime, UNIX_EPOCH};

/// Available memory below which a device counts as constrained.
const LOW_MEMORY_BYTES: u64 = 256 * 1024 * 1024;

/// Battery level (fraction) below which a discharging device counts as
/// constrained.
const LOW_BATTERY_LEVEL: f32 = 0.2;

/// Operating system and CPU architecture.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PlatformInfo {
    pub os: String,
    pub arch: String,
}

impl PlatformInfo {
    /// The platform this binary was compiled for.
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

/// Class of GPU API the device exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuKind {
    None,
    /// Graphics/shader-language API only.
    Shader,
    /// General-purpose compute API.
    Compute,
}

impl std::str::FromStr for GpuKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(GpuKind::None),
            "shader" | "webgl" | "gl" => Ok(GpuKind::Shader),
            "compute" | "webgpu" => Ok(GpuKind::Compute),
            other => Err(format!("unknown GPU kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GpuInfo {
    pub available: bool,
    pub kind: GpuKind,
    /// Device memory in bytes, when known.
    pub memory_bytes: Option<u64>,
}

impl GpuInfo {
    pub fn none() -> Self {
        Self {
            available: false,
            kind: GpuKind::None,
            memory_bytes: None,
        }
    }

    /// A GPU exposing a compute API.
    pub fn compute(memory_bytes: Option<u64>) -> Self {
        Self {
            available: true,
            kind: GpuKind::Compute,
            memory_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CpuInfo {
    pub cores: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MemoryInfo {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl MemoryInfo {
    /// Used fraction in `[0.0, 1.0]`.
    pub fn utilisation(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.total_bytes.saturating_sub(self.available_bytes) as f64 / self.total_bytes as f64
    }
}

/// Class of the active network link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    None,
    Ethernet,
    Wifi,
    Cellular,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NetworkInfo {
    pub kind: NetworkKind,
    pub speed_mbps: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BatteryInfo {
    pub present: bool,
    /// Charge level in `[0.0, 1.0]`.
    pub level: Option<f32>,
    pub charging: bool,
}

impl BatteryInfo {
    pub fn absent() -> Self {
        Self {
            present: false,
            level: None,
            charging: false,
        }
    }
}

/// A complete point-in-time reading of the device.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DeviceCapabilities {
    pub platform: PlatformInfo,
    pub gpu: GpuInfo,
    pub cpu: CpuInfo,
    pub memory: MemoryInfo,
    pub network: NetworkInfo,
    pub battery: BatteryInfo,
    /// Unix timestamp in milliseconds when the snapshot was taken.
    pub timestamp_ms: u64,
}

impl DeviceCapabilities {
    /// A conservative baseline: current platform, one core, no GPU, no
    /// network information, no battery.
    pub fn baseline() -> Self {
        Self {
            platform: PlatformInfo::current(),
            gpu: GpuInfo::none(),
            cpu: CpuInfo { cores: 1 },
            memory: MemoryInfo {
                total_bytes: 0,
                available_bytes: 0,
            },
            network: NetworkInfo {
                kind: NetworkKind::Unknown,
                speed_mbps: None,
            },
            battery: BatteryInfo::absent(),
            timestamp_ms: now_ms(),
        }
    }

    /// Returns `true` when a general-purpose GPU compute API is available.
    pub fn has_gpu_compute(&self) -> bool {
        self.gpu.available && self.gpu.kind == GpuKind::Compute
    }

    /// Returns `true` when a shader-only GPU API is available.
    pub fn has_gpu_shader(&self) -> bool {
        self.gpu.available && self.gpu.kind == GpuKind::Shader
    }

    /// Returns `true` if the device is under resource pressure.
    ///
    /// Conditions:
    /// - Less than 256 MB of memory available (when memory is known).
    /// - A discharging battery below 20%.
    pub fn is_constrained(&self) -> bool {
        let low_memory =
            self.memory.total_bytes > 0 && self.memory.available_bytes < LOW_MEMORY_BYTES;
        let low_battery = self.battery.present
            && !self.battery.charging
            && self.battery.level.is_some_and(|l| l < LOW_BATTERY_LEVEL);
        low_memory || low_battery
    }

    /// Returns a one-line summary suitable for logging or CLI display.
    ///
    /// # Example output
    /// ```text
    /// linux/x86_64: 8 cores, mem 2456/3793 MB avail, GPU compute (4096 MB), network wifi (300 Mbps), battery 80% charging
    /// ```
    pub fn summary(&self) -> String {
        let mb = |b: u64| b / (1024 * 1024);
        let gpu = match (self.gpu.available, self.gpu.memory_bytes) {
            (false, _) => "no GPU".to_string(),
            (true, Some(bytes)) => format!("GPU {:?} ({} MB)", self.gpu.kind, mb(bytes)),
            (true, None) => format!("GPU {:?}", self.gpu.kind),
        }
        .to_lowercase();
        let network = match self.network.speed_mbps {
            Some(speed) => format!("{:?} ({speed} Mbps)", self.network.kind),
            None => format!("{:?}", self.network.kind),
        }
        .to_lowercase();
        let battery = match (self.battery.present, self.battery.level) {
            (false, _) => "no battery".to_string(),
            (true, Some(level)) => format!(
                "battery {:.0}%{}",
                level * 100.0,
                if self.battery.charging { " charging" } else { "" }
            ),
            (true, None) => "battery".to_string(),
        };
        format!(
            "{}/{}: {} cores, mem {}/{} MB avail, {gpu}, network {network}, {battery}",
            self.platform.os,
            self.platform.arch,
            self.cpu.cores,
            mb(self.memory.available_bytes),
            mb(self.memory.total_bytes),
        )
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DeviceCapabilities {
        DeviceCapabilities {
            platform: PlatformInfo {
                os: "linux".into(),
                arch: "aarch64".into(),
            },
            gpu: GpuInfo::compute(Some(4096 * 1024 * 1024)),
            cpu: CpuInfo { cores: 4 },
            memory: MemoryInfo {
                total_bytes: 4000 * 1024 * 1024,
                available_bytes: 2000 * 1024 * 1024,
            },
            network: NetworkInfo {
                kind: NetworkKind::Wifi,
                speed_mbps: Some(300),
            },
            battery: BatteryInfo {
                present: true,
                level: Some(0.8),
                charging: true,
            },
            timestamp_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_summary_format() {
        let s = sample().summary();
        assert!(s.starts_with("linux/aarch64: 4 cores"));
        assert!(s.contains("mem 2000/4000 MB avail"));
        assert!(s.contains("gpu compute (4096 mb)"));
        assert!(s.contains("network wifi (300 mbps)"));
        assert!(s.contains("battery 80% charging"));
    }

    #[test]
    fn test_not_constrained() {
        assert!(!sample().is_constrained());
    }

    #[test]
    fn test_constrained_memory() {
        let mut caps = sample();
        caps.memory.available_bytes = 100 * 1024 * 1024;
        assert!(caps.is_constrained());
    }

    #[test]
    fn test_constrained_battery_only_when_discharging() {
        let mut caps = sample();
        caps.battery.level = Some(0.1);
        assert!(!caps.is_constrained());
        caps.battery.charging = false;
        assert!(caps.is_constrained());
    }

    #[test]
    fn test_gpu_kind_queries() {
        let mut caps = sample();
        assert!(caps.has_gpu_compute());
        caps.gpu.kind = GpuKind::Shader;
        assert!(!caps.has_gpu_compute());
        assert!(caps.has_gpu_shader());
        assert!(!DeviceCapabilities::baseline().has_gpu_compute());
    }

    #[test]
    fn test_gpu_kind_parse() {
        assert_eq!("WebGPU".parse::<GpuKind>().unwrap(), GpuKind::Compute);
        assert_eq!("gl".parse::<GpuKind>().unwrap(), GpuKind::Shader);
        assert!("cuda".parse::<GpuKind>().is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let caps = sample();
        let json = serde_json::to_string(&caps).unwrap();
        assert!(json.contains("\"kind\":\"compute\""));
        let back: DeviceCapabilities = serde_json::from_str(&json).unwrap();
        assert_eq!(back, caps);
    }
}
