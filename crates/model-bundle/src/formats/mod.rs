// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Model payload formats understood by the non-script backends.
//!
//! | Format | `"format"` tag | Backends |
//! |---|---|---|
//! | [`GraphModel`] | `graph-model` | graph, tensor |
//! | [`LayersModel`] | `layers-model` | tensor |
//! | [`ComputeProgram`] | `compute-program` | gpu-compute |
//!
//! All three are JSON. When the `"format"` tag is missing, the format is
//! inferred from the top-level keys (`nodes`, `layers`, `stages`).

pub mod compute;
pub mod graph;
pub mod layers;

pub use compute::{ComputeOp, ComputeProgram, ComputeStage};
pub use graph::{GraphModel, GraphNode, GraphOp, Initializer, NodeAttrs};
pub use layers::{Activation, Layer, LayersModel};

use serde_json::Value;

/// The recognised model payload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    GraphModel,
    LayersModel,
    ComputeProgram,
}

impl ModelFormat {
    /// Detects the format of a model file.
    ///
    /// Returns `None` when the content is not a JSON object of a known
    /// format.
    pub fn detect(name: &str, bytes: &[u8]) -> Option<Self> {
        let value: Value = serde_json::from_slice(bytes).ok()?;
        let object = value.as_object()?;

        match object.get("format").and_then(Value::as_str) {
            Some("graph-model") => return Some(Self::GraphModel),
            Some("layers-model") => return Some(Self::LayersModel),
            Some("compute-program") => return Some(Self::ComputeProgram),
            Some(_) => return None,
            None => {}
        }

        if object.contains_key("nodes") || name.ends_with(".graph.json") {
            Some(Self::GraphModel)
        } else if object.contains_key("layers") {
            Some(Self::LayersModel)
        } else if object.contains_key("stages") {
            Some(Self::ComputeProgram)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GraphModel => "graph-model",
            Self::LayersModel => "layers-model",
            Self::ComputeProgram => "compute-program",
        }
    }
}

impl std::fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_by_tag() {
        let detect = |json: &str| ModelFormat::detect("model.json", json.as_bytes());
        assert_eq!(detect(r#"{"format":"graph-model"}"#), Some(ModelFormat::GraphModel));
        assert_eq!(detect(r#"{"format":"layers-model"}"#), Some(ModelFormat::LayersModel));
        assert_eq!(detect(r#"{"format":"compute-program"}"#), Some(ModelFormat::ComputeProgram));
        assert_eq!(detect(r#"{"format":"onnx"}"#), None);
    }

    #[test]
    fn test_detect_by_keys_and_name() {
        assert_eq!(
            ModelFormat::detect("m.json", br#"{"layers":[]}"#),
            Some(ModelFormat::LayersModel)
        );
        assert_eq!(
            ModelFormat::detect("m.graph.json", br#"{}"#),
            Some(ModelFormat::GraphModel)
        );
        assert_eq!(ModelFormat::detect("m.json", b"not json"), None);
        assert_eq!(ModelFormat::detect("m.json", b"[1,2]"), None);
    }
}
