// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The execution runtimes a bundle can target.

use crate::BundleError;
use std::fmt;
use std::str::FromStr;

/// One of the four interchangeable execution backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeKind {
    /// Script interpreter running in an isolated worker thread.
    Interpreter,
    /// Operator-graph inference session.
    Graph,
    /// Tensor-graph runtime with pooled intermediates.
    Tensor,
    /// Compute-shader runtime.
    GpuCompute,
}

impl RuntimeKind {
    /// Every runtime, in detection preference order.
    pub const ALL: [RuntimeKind; 4] = [
        RuntimeKind::GpuCompute,
        RuntimeKind::Graph,
        RuntimeKind::Tensor,
        RuntimeKind::Interpreter,
    ];

    /// The manifest tag for this runtime.
    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeKind::Interpreter => "interpreter",
            RuntimeKind::Graph => "graph",
            RuntimeKind::Tensor => "tensor",
            RuntimeKind::GpuCompute => "gpu-compute",
        }
    }
}

impl FromStr for RuntimeKind {
    type Err = BundleError;

    /// Parses a manifest tag. Accepts a few common aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interpreter" | "script" | "worker" => Ok(RuntimeKind::Interpreter),
            "graph" | "graph-inference" => Ok(RuntimeKind::Graph),
            "tensor" | "tensor-graph" => Ok(RuntimeKind::Tensor),
            "gpu-compute" | "gpu" | "compute" | "gpu_compute" => Ok(RuntimeKind::GpuCompute),
            _ => Err(BundleError::UnknownRuntime(s.to_string())),
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tags_and_aliases() {
        assert_eq!("graph".parse::<RuntimeKind>().unwrap(), RuntimeKind::Graph);
        assert_eq!("GPU".parse::<RuntimeKind>().unwrap(), RuntimeKind::GpuCompute);
        assert_eq!("script".parse::<RuntimeKind>().unwrap(), RuntimeKind::Interpreter);
        assert!("onnx".parse::<RuntimeKind>().is_err());
    }

    #[test]
    fn test_display_matches_serde() {
        for kind in RuntimeKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }
}
