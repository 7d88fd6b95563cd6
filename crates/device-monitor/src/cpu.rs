// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Online core count.
//!
//! Reads `sys/devices/system/cpu/online` (e.g. `"0-3"` → 4 cores) under the
//! reader root, falling back to `std::thread::available_parallelism()`.

use crate::sysfs::read_trimmed;
use crate::{CpuInfo, MonitorError};
use std::path::Path;

const ONLINE_PATH: &str = "sys/devices/system/cpu/online";

pub(crate) fn read_cpu(root: &Path) -> CpuInfo {
    let cores = match read_online_cores(root) {
        Ok(cores) => cores,
        Err(e) => {
            tracing::debug!(error = %e, "online core count unavailable, using available_parallelism");
            std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1)
        }
    };
    CpuInfo { cores }
}

fn read_online_cores(root: &Path) -> Result<u32, MonitorError> {
    let path = root.join(ONLINE_PATH);
    let content = read_trimmed(&path)?;
    parse_cpu_range(&content).ok_or_else(|| MonitorError::ParseError {
        path: path.display().to_string(),
        detail: format!("unexpected cpu range '{content}'"),
    })
}

/// Counts the CPUs in a kernel range list such as `"0-3"` or `"0-1,4,6-7"`.
pub(crate) fn parse_cpu_range(s: &str) -> Option<u32> {
    let mut count = 0u32;
    for part in s.trim().split(',').filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: u32 = lo.trim().parse().ok()?;
                let hi: u32 = hi.trim().parse().ok()?;
                if hi < lo {
                    return None;
                }
                count += hi - lo + 1;
            }
            None => {
                part.trim().parse::<u32>().ok()?;
                count += 1;
            }
        }
    }
    (count > 0).then_some(count)
}
