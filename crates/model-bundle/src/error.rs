// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for bundle loading, verification and model parsing.

/// Errors that can occur while reading, verifying or parsing a bundle.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    /// A bundle file could not be read.
    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The manifest JSON is malformed.
    #[error("failed to parse manifest: {0}")]
    ManifestParse(#[from] serde_json::Error),

    /// A required manifest field is missing or empty.
    #[error("manifest is incomplete: {0}")]
    Incomplete(String),

    /// The manifest names a runtime that does not exist.
    #[error("unknown runtime '{0}'")]
    UnknownRuntime(String),

    /// The payload digest does not match the manifest.
    #[error("integrity check failed: expected sha256 {expected}, computed {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    /// A per-file size or hash record does not match the file content.
    #[error("file record mismatch for '{name}': {detail}")]
    FileRecord { name: String, detail: String },

    /// A model payload could not be parsed or failed validation.
    #[error("invalid {format}: {detail}")]
    InvalidModel {
        format: &'static str,
        detail: String,
    },
}

impl BundleError {
    pub(crate) fn invalid(format: &'static str, detail: impl Into<String>) -> Self {
        Self::InvalidModel {
            format,
            detail: detail.into(),
        }
    }

    /// Returns `true` for I/O failures while fetching bundle content.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}
