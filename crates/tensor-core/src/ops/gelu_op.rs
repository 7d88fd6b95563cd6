// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Gaussian Error Linear Unit (GELU) activation.

use super::check_same_shape;
use crate::{TensorError, TensorView, TensorViewMut};

/// Coefficient `sqrt(2/π)`.
const SQRT_2_OVER_PI: f32 = 0.797_884_6;

/// Cubic coefficient in the tanh approximation.
const GELU_COEFF: f32 = 0.044715;

/// Applies GELU element-wise using the tanh approximation:
///
/// `GELU(x) ≈ 0.5 * x * (1 + tanh(sqrt(2/π) * (x + 0.044715 * x³)))`
pub fn gelu(input: &TensorView<'_>, output: &mut TensorViewMut<'_>) -> Result<(), TensorError> {
    check_same_shape("gelu", input, output)?;

    for (d, &x) in output.as_mut_slice().iter_mut().zip(input.as_slice()) {
        *d = gelu_scalar(x);
    }
    Ok(())
}

#[inline(always)]
fn gelu_scalar(x: f32) -> f32 {
    let inner = SQRT_2_OVER_PI * (x + GELU_COEFF * x * x * x);
    0.5 * x * (1.0 + inner.tanh())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DType, Shape, Tensor};

    #[test]
    fn test_gelu_known_points() {
        let x = Tensor::from_vec(Shape::vector(3), vec![0.0, 1.0, -1.0]).unwrap();
        let mut y = Tensor::zeros(Shape::vector(3), DType::F32);
        gelu(&x.view(), &mut y.view_mut()).unwrap();

        let out = y.as_slice();
        assert_eq!(out[0], 0.0);
        assert!((out[1] - 0.8412).abs() < 1e-3);
        assert!((out[2] + 0.1588).abs() < 1e-3);
    }

    #[test]
    fn test_gelu_large_positive_is_identity() {
        let x = Tensor::from_vec(Shape::vector(1), vec![10.0]).unwrap();
        let mut y = Tensor::zeros(Shape::vector(1), DType::F32);
        gelu(&x.view(), &mut y.view_mut()).unwrap();
        assert!((y.as_slice()[0] - 10.0).abs() < 1e-4);
    }
}
