// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Softmax activation operation.

use super::check_same_shape;
use crate::{TensorError, TensorView, TensorViewMut};

/// Computes softmax along the last dimension:
/// `output[i] = exp(x[i] - max) / sum(exp(x - max))`.
///
/// Uses the numerically stable variant that subtracts the row maximum
/// before exponentiation.
///
/// # Errors
/// Returns [`TensorError::ShapeMismatch`] if input and output shapes differ.
pub fn softmax(input: &TensorView<'_>, output: &mut TensorViewMut<'_>) -> Result<(), TensorError> {
    check_same_shape("softmax", input, output)?;

    let dst = output.as_mut_slice();
    if input.shape().rank() == 0 {
        dst[0] = 1.0;
        return Ok(());
    }

    let last_dim = input.shape().last_dim();
    if last_dim == 0 {
        return Ok(());
    }

    for (row_src, row_dst) in input
        .as_slice()
        .chunks_exact(last_dim)
        .zip(dst.chunks_exact_mut(last_dim))
    {
        let max_val = row_src.iter().copied().fold(f32::NEG_INFINITY, f32::max);

        let mut sum = 0.0f32;
        for (d, &s) in row_dst.iter_mut().zip(row_src) {
            let e = (s - max_val).exp();
            *d = e;
            sum += e;
        }

        if sum > 0.0 {
            let inv_sum = 1.0 / sum;
            row_dst.iter_mut().for_each(|d| *d *= inv_sum);
        }
    }

    Ok(())
}
