// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # device-monitor
//!
//! Point-in-time device capability snapshots used to pick an execution
//! backend.
//!
//! # Reported Capabilities
//! - **Platform**: OS and architecture.
//! - **GPU**: presence, API class (`shader` or `compute`) and memory.
//! - **CPU**: online core count.
//! - **Memory**: total and available bytes from `/proc/meminfo`.
//! - **Network**: active link class (ethernet, wifi, cellular) and speed.
//! - **Battery**: presence, charge level and charging state.
//!
//! Snapshots are captured on demand through a [`CapabilityReader`] and are
//! never cached: network and battery state can change between inferences.
//!
//! # Graceful Degradation
//! [`SystemReader`] reads procfs/sysfs. Missing files degrade to conservative
//! defaults (no GPU, unknown network, no battery) instead of failing, so a
//! snapshot is always produced. [`StaticReader`] returns a fixed snapshot for
//! tests and for hosts that know their hardware.
//!
//! # Example
//! ```no_run
//! use device_monitor::{CapabilityReader, SystemReader};
//!
//! let caps = SystemReader::new().capture();
//! println!("{}", caps.summary());
//! if caps.is_constrained() {
//!     println!("device is constrained; prefer small models");
//! }
//! ```

mod battery;
mod capabilities;
mod cpu;
mod error;
mod gpu;
mod memory;
mod network;
mod reader;
mod sysfs;

pub use capabilities::{
    BatteryInfo, CpuInfo, DeviceCapabilities, GpuInfo, GpuKind, MemoryInfo, NetworkInfo,
    NetworkKind, PlatformInfo,
};
pub use error::MonitorError;
pub use reader::{CapabilityReader, StaticReader, SystemReader, GPU_OVERRIDE_ENV};
