// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Layer normalization operation.

use super::check_same_shape;
use crate::{TensorError, TensorView, TensorViewMut};

/// Applies layer normalization over the last dimension:
///
/// `output = gamma * (x - mean) / sqrt(var + eps) + beta`
///
/// # Arguments
/// * `input`  - the input tensor (any rank ≥ 1, normalised over last dim).
/// * `gamma`  - optional scale, length equal to the last dimension (defaults to 1).
/// * `beta`   - optional shift, length equal to the last dimension (defaults to 0).
/// * `eps`    - small constant for numerical stability (typically 1e-5).
/// * `output` - output view with the same shape as `input`.
pub fn layer_norm(
    input: &TensorView<'_>,
    gamma: Option<&[f32]>,
    beta: Option<&[f32]>,
    eps: f32,
    output: &mut TensorViewMut<'_>,
) -> Result<(), TensorError> {
    check_same_shape("layer_norm", input, output)?;

    if input.shape().rank() == 0 {
        return Err(TensorError::Numeric {
            op: "layer_norm",
            detail: "cannot normalise a scalar".into(),
        });
    }
    let last_dim = input.shape().last_dim();
    for (name, param) in [("gamma", gamma), ("beta", beta)] {
        if let Some(p) = param {
            if p.len() != last_dim {
                return Err(TensorError::Numeric {
                    op: "layer_norm",
                    detail: format!("{name} has {} elements, expected {last_dim}", p.len()),
                });
            }
        }
    }
    if last_dim == 0 {
        return Ok(());
    }

    for (row_src, row_dst) in input
        .as_slice()
        .chunks_exact(last_dim)
        .zip(output.as_mut_slice().chunks_exact_mut(last_dim))
    {
        let n = last_dim as f32;
        let mean = row_src.iter().sum::<f32>() / n;
        let var = row_src.iter().map(|&x| (x - mean) * (x - mean)).sum::<f32>() / n;
        let inv_std = 1.0 / (var + eps).sqrt();

        for (j, (d, &x)) in row_dst.iter_mut().zip(row_src).enumerate() {
            let g = gamma.map_or(1.0, |g| g[j]);
            let b = beta.map_or(0.0, |b| b[j]);
            *d = g * (x - mean) * inv_std + b;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DType, Shape, Tensor};

    #[test]
    fn test_layer_norm_zero_mean_unit_var() {
        let x = Tensor::from_vec(Shape::matrix(1, 4), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let mut y = Tensor::zeros(Shape::matrix(1, 4), DType::F32);
        layer_norm(&x.view(), None, None, 1e-5, &mut y.view_mut()).unwrap();

        let out = y.as_slice();
        let mean: f32 = out.iter().sum::<f32>() / 4.0;
        let var: f32 = out.iter().map(|v| v * v).sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-5);
        assert!((var - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_layer_norm_gamma_beta() {
        let x = Tensor::from_vec(Shape::vector(2), vec![0.0, 2.0]).unwrap();
        let mut y = Tensor::zeros(Shape::vector(2), DType::F32);
        layer_norm(&x.view(), Some(&[2.0, 2.0]), Some(&[1.0, 1.0]), 0.0, &mut y.view_mut())
            .unwrap();
        assert_eq!(y.as_slice(), &[-1.0, 3.0]);
    }

    #[test]
    fn test_layer_norm_bad_gamma() {
        let x = Tensor::zeros(Shape::vector(3), DType::F32);
        let mut y = Tensor::zeros(Shape::vector(3), DType::F32);
        assert!(layer_norm(&x.view(), Some(&[1.0]), None, 1e-5, &mut y.view_mut()).is_err());
    }
}
