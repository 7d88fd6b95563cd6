// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Adapter lifecycle status.
//!
//! ```text
//! Idle ──initialize──▶ Initializing ──ok──▶ Ready
//! Ready ──load──▶ Loading ──ok──▶ Ready
//! Ready ──predict──▶ Executing ──ok──▶ Ready
//! any ──failure──▶ Error        (non-terminal)
//! any ──cleanup──▶ Terminated   (terminal)
//! ```

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeStatus {
    Idle,
    Initializing,
    Ready,
    Loading,
    Executing,
    Error,
    Terminated,
}

impl RuntimeStatus {
    /// Returns `true` once no further calls are permitted.
    pub fn is_terminal(self) -> bool {
        self == RuntimeStatus::Terminated
    }

    /// Returns `true` while a load or predict is in flight.
    pub fn is_busy(self) -> bool {
        matches!(self, RuntimeStatus::Loading | RuntimeStatus::Executing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeStatus::Idle => "idle",
            RuntimeStatus::Initializing => "initializing",
            RuntimeStatus::Ready => "ready",
            RuntimeStatus::Loading => "loading",
            RuntimeStatus::Executing => "executing",
            RuntimeStatus::Error => "error",
            RuntimeStatus::Terminated => "terminated",
        }
    }
}

impl fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        assert!(RuntimeStatus::Terminated.is_terminal());
        assert!(!RuntimeStatus::Error.is_terminal());
        assert!(RuntimeStatus::Loading.is_busy());
        assert!(!RuntimeStatus::Ready.is_busy());
    }

    #[test]
    fn test_display_matches_serde() {
        let json = serde_json::to_string(&RuntimeStatus::Executing).unwrap();
        assert_eq!(json, format!("\"{}\"", RuntimeStatus::Executing));
    }
}
