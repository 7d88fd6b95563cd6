// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! SHA-256 payload digests.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Digest over a bundle payload.
///
/// Hashes the code bytes (if any), then each file in name order as
/// `name || 0x00 || content`.
pub fn payload_digest(code: Option<&str>, files: &BTreeMap<String, Vec<u8>>) -> String {
    let mut hasher = Sha256::new();
    if let Some(code) = code {
        hasher.update(code.as_bytes());
    }
    for (name, content) in files {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(content);
    }
    format!("{:x}", hasher.finalize())
}
