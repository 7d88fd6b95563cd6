// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Shared helpers for reading procfs/sysfs files.

use crate::MonitorError;
use std::path::Path;

/// Reads a file and returns its trimmed content.
pub(crate) fn read_trimmed(path: &Path) -> Result<String, MonitorError> {
    if !path.exists() {
        return Err(MonitorError::NotAvailable {
            path: path.display().to_string(),
        });
    }
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|source| MonitorError::ReadError {
            path: path.display().to_string(),
            source,
        })
}

/// Reads and parses a file holding a single value.
pub(crate) fn read_parsed<T: std::str::FromStr>(path: &Path) -> Result<T, MonitorError> {
    let content = read_trimmed(path)?;
    content.parse().map_err(|_| MonitorError::ParseError {
        path: path.display().to_string(),
        detail: format!("unexpected value '{content}'"),
    })
}

/// Names of the entries in a directory, sorted. Empty if it cannot be read.
pub(crate) fn list_dir(path: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(path)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
