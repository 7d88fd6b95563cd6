// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! System memory via `/proc/meminfo`.

use crate::sysfs::read_trimmed;
use crate::{MemoryInfo, MonitorError};
use std::path::Path;

const MEMINFO_PATH: &str = "proc/meminfo";

pub(crate) fn read_memory(root: &Path) -> Result<MemoryInfo, MonitorError> {
    let path = root.join(MEMINFO_PATH);
    parse_meminfo(&read_trimmed(&path)?, &path)
}

/// Parses `MemTotal` and `MemAvailable` (reported in kB).
pub(crate) fn parse_meminfo(content: &str, source: &Path) -> Result<MemoryInfo, MonitorError> {
    let mut total_kb = None;
    let mut available_kb = None;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        let slot = match key {
            "MemTotal:" => &mut total_kb,
            "MemAvailable:" => &mut available_kb,
            _ => continue,
        };
        *slot = Some(value.parse::<u64>().map_err(|_| MonitorError::ParseError {
            path: source.display().to_string(),
            detail: format!("expected integer kB value for {key}, got '{value}'"),
        })?);
        if total_kb.is_some() && available_kb.is_some() {
            break;
        }
    }

    let missing = |field: &str| MonitorError::ParseError {
        path: source.display().to_string(),
        detail: format!("{field} not found"),
    };
    let total_kb = total_kb.ok_or_else(|| missing("MemTotal"))?;
    let available_kb = available_kb.ok_or_else(|| missing("MemAvailable"))?;

    Ok(MemoryInfo {
        total_bytes: total_kb * 1024,
        available_bytes: available_kb * 1024,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
MemTotal:        3884076 kB
MemFree:          512000 kB
MemAvailable:    2515148 kB
Buffers:          102400 kB
";

    #[test]
    fn test_parse_meminfo() {
        let info = parse_meminfo(SAMPLE, Path::new("test")).unwrap();
        assert_eq!(info.total_bytes, 3_884_076 * 1024);
        assert_eq!(info.available_bytes, 2_515_148 * 1024);
        assert!((info.utilisation() - 0.3524).abs() < 0.001);
    }

    #[test]
    fn test_parse_meminfo_missing_available() {
        let err = parse_meminfo("MemTotal: 100 kB\n", Path::new("test")).unwrap_err();
        assert!(err.to_string().contains("MemAvailable not found"));
    }

    #[test]
    fn test_parse_meminfo_bad_value() {
        assert!(parse_meminfo("MemTotal: lots kB\n", Path::new("test")).is_err());
    }

    #[test]
    fn test_read_memory_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_memory(dir.path()),
            Err(MonitorError::NotAvailable { .. })
        ));
    }
}
