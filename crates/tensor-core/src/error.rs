// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for tensor operations.

use crate::Shape;

/// Errors that can occur during tensor construction, conversion or kernels.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TensorError {
    /// The element count does not match the shape.
    #[error("element count mismatch: shape {shape} needs {expected} elements, got {actual}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        actual: usize,
    },

    /// Two tensors have incompatible shapes for the requested operation.
    #[error("incompatible shapes for {op}: {lhs} vs {rhs}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Shape,
        rhs: Shape,
    },

    /// A JSON value could not be converted into a tensor.
    #[error("cannot convert value to tensor: {0}")]
    Conversion(String),

    /// A numeric computation failed (e.g., NaN or overflow).
    #[error("numeric error in {op}: {detail}")]
    Numeric { op: &'static str, detail: String },
}
