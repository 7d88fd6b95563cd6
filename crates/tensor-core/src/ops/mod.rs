// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor arithmetic operations.
//!
//! Each operation writes into a caller-provided [`TensorViewMut`] so the
//! adapters can back intermediates with pooled buffers instead of
//! allocating in the inference hot path.

mod elementwise_op;
mod gelu_op;
mod layer_norm_op;
mod matmul_op;
mod softmax_op;

pub use elementwise_op::{binary, broadcast_shape, sum_all, unary, BinaryOp, UnaryOp};
pub use gelu_op::gelu;
pub use layer_norm_op::layer_norm;
pub use matmul_op::matmul;
pub use softmax_op::softmax;

use crate::{Shape, TensorError, TensorView, TensorViewMut};

/// Checks that `output` has exactly the shape of `input`.
pub(crate) fn check_same_shape(
    op: &'static str,
    input: &TensorView<'_>,
    output: &TensorViewMut<'_>,
) -> Result<(), TensorError> {
    check_output_shape(op, input.shape(), output)
}

/// Checks that `output` has the expected shape.
pub(crate) fn check_output_shape(
    op: &'static str,
    expected: &Shape,
    output: &TensorViewMut<'_>,
) -> Result<(), TensorError> {
    if expected != output.shape() {
        return Err(TensorError::ShapeMismatch {
            op,
            lhs: expected.clone(),
            rhs: output.shape().clone(),
        });
    }
    Ok(())
}
