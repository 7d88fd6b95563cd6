// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! JSON bundle manifest.
//!
//! # Format
//! ```json
//! {
//!   "name": "scaler",
//!   "version": "1.0.0",
//!   "runtime": "interpreter",
//!   "entrypoint": "model.rt",
//!   "entry_function": "predict",
//!   "dependencies": [],
//!   "sha256": "9f86d081884c7d65...",
//!   "inputs": [{ "name": "x", "dtype": "float32", "shape": [3] }],
//!   "outputs": [{ "name": "y", "dtype": "float32" }],
//!   "files": { "weights.json": { "size": 120, "sha256": "..." } },
//!   "operations": ["add"]
//! }
//! ```

use crate::{BundleError, RuntimeKind};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Entry function called when a manifest does not name one.
pub const DEFAULT_ENTRY_FUNCTION: &str = "predict";

/// Dtype names accepted in [`IoSpec::dtype`] besides the numeric ones.
const NON_NUMERIC_DTYPES: [&str; 2] = ["string", "any"];

/// Top-level bundle descriptor, deserialized from `manifest.json`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    /// Runtime tag (`"interpreter"`, `"graph"`, `"tensor"`, `"gpu-compute"`)
    /// or `"auto"` to let the host pick.
    pub runtime: String,
    /// File name of the script code, for bundles that carry code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    #[serde(default = "default_entry_function")]
    pub entry_function: String,
    /// Name of the model file among [`Manifest::files`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_file: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Lowercase hex payload digest.
    #[serde(default)]
    pub sha256: String,
    #[serde(default)]
    pub inputs: Vec<IoSpec>,
    #[serde(default)]
    pub outputs: Vec<IoSpec>,
    #[serde(default)]
    pub files: BTreeMap<String, FileRecord>,
    /// Operations the model uses, for backends that only support a fixed set.
    #[serde(default)]
    pub operations: Vec<String>,
}

fn default_entry_function() -> String {
    DEFAULT_ENTRY_FUNCTION.to_string()
}

/// One declared input or output.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IoSpec {
    pub name: String,
    /// `float32`, `float16`, `int32`, `int64`, `bool`, `string` or `any`.
    pub dtype: String,
    /// Declared shape; `-1` marks a dynamic dimension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<i64>>,
    #[serde(default)]
    pub optional: bool,
}

impl IoSpec {
    pub fn new(name: impl Into<String>, dtype: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dtype: dtype.into(),
            shape: None,
            optional: false,
        }
    }

    pub fn with_shape(mut self, shape: Vec<i64>) -> Self {
        self.shape = Some(shape);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// The numeric tensor dtype, or `None` for `string`/`any`.
    pub fn tensor_dtype(&self) -> Option<tensor_core::DType> {
        tensor_core::DType::from_manifest(&self.dtype)
    }
}

/// Size and digest of one bundled file.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FileRecord {
    pub size: u64,
    pub sha256: String,
}

impl Manifest {
    /// Loads a manifest from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, BundleError> {
        let content = std::fs::read_to_string(path).map_err(|source| BundleError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Parses a manifest from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, BundleError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes the manifest as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, BundleError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The concrete runtime the manifest declares, or `None` for `"auto"`.
    pub fn declared_runtime(&self) -> Result<Option<RuntimeKind>, BundleError> {
        if self.runtime.trim().eq_ignore_ascii_case("auto") {
            return Ok(None);
        }
        self.runtime.parse().map(Some)
    }

    /// Checks that every field a backend relies on is present and coherent.
    ///
    /// # Checks
    /// - `name`, `version`, `runtime` and `sha256` are non-empty, and the
    ///   runtime tag is known.
    /// - The bundle carries an entrypoint, a model file or an operation list.
    /// - `model_file`, when set, is listed in `files`.
    /// - Input and output names are non-empty and unique; dtypes are known.
    pub fn check_complete(&self) -> Result<(), BundleError> {
        for (field, value) in [
            ("name", &self.name),
            ("version", &self.version),
            ("runtime", &self.runtime),
            ("sha256", &self.sha256),
        ] {
            if value.trim().is_empty() {
                return Err(BundleError::Incomplete(format!("'{field}' is empty")));
            }
        }
        self.declared_runtime()?;

        if self.entrypoint.is_none() && self.model_file.is_none() && self.operations.is_empty() {
            return Err(BundleError::Incomplete(
                "bundle declares no entrypoint, model file or operations".into(),
            ));
        }
        if let Some(model_file) = &self.model_file {
            if !self.files.contains_key(model_file) {
                return Err(BundleError::Incomplete(format!(
                    "model file '{model_file}' is not listed in files"
                )));
            }
        }

        for (kind, specs) in [("input", &self.inputs), ("output", &self.outputs)] {
            let mut seen = HashSet::new();
            for spec in specs {
                if spec.name.is_empty() {
                    return Err(BundleError::Incomplete(format!("{kind} with empty name")));
                }
                if !seen.insert(spec.name.as_str()) {
                    return Err(BundleError::Incomplete(format!(
                        "duplicate {kind} '{}'",
                        spec.name
                    )));
                }
                let known = spec.tensor_dtype().is_some()
                    || NON_NUMERIC_DTYPES.contains(&spec.dtype.to_ascii_lowercase().as_str());
                if !known {
                    return Err(BundleError::Incomplete(format!(
                        "{kind} '{}' has unknown dtype '{}'",
                        spec.name, spec.dtype
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "name": "scaler",
            "version": "1.0.0",
            "runtime": "interpreter",
            "entrypoint": "model.rt",
            "sha256": "abc",
            "inputs": [{ "name": "x", "dtype": "float32", "shape": [3] }],
            "outputs": [{ "name": "y", "dtype": "float32" }]
        }"#
    }

    #[test]
    fn test_parse_defaults() {
        let m = Manifest::from_json(sample_json()).unwrap();
        assert_eq!(m.entry_function, "predict");
        assert!(m.files.is_empty());
        assert_eq!(m.inputs[0].shape, Some(vec![3]));
        assert!(!m.inputs[0].optional);
        m.check_complete().unwrap();
    }

    #[test]
    fn test_declared_runtime_auto() {
        let mut m = Manifest::from_json(sample_json()).unwrap();
        m.runtime = "auto".into();
        assert_eq!(m.declared_runtime().unwrap(), None);
        m.runtime = "quantum".into();
        assert!(m.check_complete().is_err());
    }

    #[test]
    fn test_incomplete_manifests() {
        let mut m = Manifest::from_json(sample_json()).unwrap();
        m.sha256.clear();
        assert!(matches!(m.check_complete(), Err(BundleError::Incomplete(_))));

        let mut m = Manifest::from_json(sample_json()).unwrap();
        m.entrypoint = None;
        assert!(m.check_complete().is_err());

        let mut m = Manifest::from_json(sample_json()).unwrap();
        m.model_file = Some("missing.graph.json".into());
        assert!(m.check_complete().is_err());
    }

    #[test]
    fn test_duplicate_and_unknown_io() {
        let mut m = Manifest::from_json(sample_json()).unwrap();
        m.inputs.push(IoSpec::new("x", "float32"));
        assert!(m.check_complete().is_err());

        let mut m = Manifest::from_json(sample_json()).unwrap();
        m.outputs[0].dtype = "complex128".into();
        assert!(m.check_complete().is_err());

        let mut m = Manifest::from_json(sample_json()).unwrap();
        m.outputs[0].dtype = "any".into();
        assert!(m.check_complete().is_ok());
    }

    #[test]
    fn test_json_roundtrip_keeps_optional_fields_out() {
        let m = Manifest::from_json(sample_json()).unwrap();
        let text = m.to_json().unwrap();
        assert!(!text.contains("model_file"));
        assert_eq!(Manifest::from_json(&text).unwrap(), m);
    }
}
