// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the runtime.
//!
//! Every failure crossing the adapter boundary is a [`RuntimeError`]: a
//! typed [`ErrorKind`], a message, optional backend diagnostic text and the
//! time it was raised. Errors from the lower crates convert into the
//! matching kind.

use memory_manager::MemoryError;
use model_bundle::BundleError;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use tensor_core::TensorError;

/// Error taxonomy shared by every adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Bundle could not be fetched or read.
    Network,
    /// Manifest, schema, handle or integrity check failed.
    Validation,
    /// Backend startup failed.
    Initialization,
    /// Model-specific load failure.
    Loading,
    /// Failure during predict.
    Execution,
    /// A request exceeded its deadline.
    Timeout,
    /// Backend ran out of memory.
    Memory,
    /// Call not permitted in the adapter's current state.
    Lifecycle,
    /// The caller cancelled the operation.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Validation => "validation",
            ErrorKind::Initialization => "initialization",
            ErrorKind::Loading => "loading",
            ErrorKind::Execution => "execution",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Memory => "memory",
            ErrorKind::Lifecycle => "lifecycle",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured runtime failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[error("{kind} error: {message}")]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    /// Backend diagnostic text (script traceback, kernel error), if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native: Option<String>,
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: u64,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            native: None,
            timestamp_ms: now_ms(),
        }
    }

    /// Attaches backend diagnostic text.
    pub fn with_native(mut self, native: impl Into<String>) -> Self {
        self.native = Some(native.into());
        self
    }

    /// Prefixes the message, keeping kind and diagnostics.
    pub fn context(mut self, prefix: impl fmt::Display) -> Self {
        self.message = format!("{prefix}: {}", self.message);
        self
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn initialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Initialization, message)
    }

    pub fn loading(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Loading, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execution, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Lifecycle, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Configuration problems are reported as validation failures.
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, format!("configuration: {}", message.into()))
    }
}

impl From<BundleError> for RuntimeError {
    fn from(err: BundleError) -> Self {
        let kind = match &err {
            e if e.is_io() => ErrorKind::Network,
            BundleError::InvalidModel { .. } => ErrorKind::Loading,
            _ => ErrorKind::Validation,
        };
        RuntimeError::new(kind, err.to_string())
    }
}

impl From<MemoryError> for RuntimeError {
    fn from(err: MemoryError) -> Self {
        RuntimeError::new(ErrorKind::Memory, err.to_string())
    }
}

impl From<TensorError> for RuntimeError {
    fn from(err: TensorError) -> Self {
        let text = err.to_string();
        RuntimeError::new(ErrorKind::Execution, format!("tensor operation failed: {text}"))
            .with_native(text)
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

    #[test]
    fn test_display_and_kind() {
        let err = RuntimeError::validation("hash mismatch");
        assert_eq!(err.to_string(), "validation error: hash mismatch");
        assert!(err.is(ErrorKind::Validation));
        assert!(err.timestamp_ms > 0);
    }

    #[test]
    fn test_context_keeps_native() {
        let err = RuntimeError::execution("boom")
            .with_native("Traceback: ...")
            .context("stage 'a'");
        assert_eq!(err.message, "stage 'a': boom");
        assert_eq!(err.native.as_deref(), Some("Traceback: ..."));
    }

    #[test]
    fn test_bundle_error_mapping() {
        let io = BundleError::Io {
            path: "x".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert_eq!(RuntimeError::from(io).kind, ErrorKind::Network);

        let mismatch = BundleError::IntegrityMismatch {
            expected: "a".into(),
            actual: "b".into(),
        };
        assert_eq!(RuntimeError::from(mismatch).kind, ErrorKind::Validation);
    }

    #[test]
    fn test_memory_and_tensor_mapping() {
        let oom = MemoryError::ZeroSizedAllocation;
        assert_eq!(RuntimeError::from(oom).kind, ErrorKind::Memory);

        let tensor = TensorError::Conversion("bad".into());
        let err = RuntimeError::from(tensor);
        assert_eq!(err.kind, ErrorKind::Execution);
        assert!(err.native.is_some());
    }

    #[test]
    fn test_serde_kind_names() {
        let json = serde_json::to_string(&RuntimeError::cancelled("stop")).unwrap();
        assert!(json.contains("\"kind\":\"cancelled\""));
        assert!(!json.contains("native"));
    }
}
