// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Logical element types declared by model manifests.

/// Enumerates the element types a [`crate::Tensor`] can represent.
///
/// Storage is always `f32`; the dtype decides how values are coerced on the
/// way in (integers are rounded, booleans become `0.0`/`1.0`) and how they
/// are rendered back to JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 32-bit IEEE 754 floating point.
    F32,
    /// 16-bit floating point (stored widened to f32).
    F16,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
    /// Boolean.
    Bool,
}

impl DType {
    /// Maps a manifest dtype string onto a tensor dtype.
    ///
    /// Accepts the canonical names (`"float32"`, `"int64"`, ...) and the
    /// short forms (`"f32"`, `"i64"`). Returns `None` for non-numeric
    /// dtypes such as `"string"` or `"any"`.
    pub fn from_manifest(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "float32" | "f32" | "float" => Some(Self::F32),
            "float16" | "f16" | "half" => Some(Self::F16),
            "int32" | "i32" | "int" => Some(Self::I32),
            "int64" | "i64" | "long" => Some(Self::I64),
            "bool" | "boolean" => Some(Self::Bool),
            _ => None,
        }
    }

    /// Returns the size of a single element in bytes, as the backend
    /// would store it natively.
    pub fn size_bytes(self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F16 => 2,
            DType::I64 => 8,
            DType::Bool => 1,
        }
    }

    /// Returns `true` for integer dtypes.
    pub fn is_integer(self) -> bool {
        matches!(self, DType::I32 | DType::I64)
    }

    /// Coerces a raw value into this dtype's value domain.
    pub fn coerce(self, value: f32) -> f32 {
        match self {
            DType::F32 | DType::F16 => value,
            DType::I32 | DType::I64 => value.round(),
            DType::Bool => {
                if value != 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Returns a human-readable label for this data type.
    pub fn as_str(self) -> &'static str {
        match self {
            DType::F32 => "float32",
            DType::F16 => "float16",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::Bool => "bool",
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
