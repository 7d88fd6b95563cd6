// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Matrix multiplication operation.

use super::check_output_shape;
use crate::{Shape, TensorError, TensorView, TensorViewMut};

/// Performs matrix multiplication: `output = lhs @ rhs`.
///
/// Both inputs must be 2-D with compatible inner dimensions:
/// `lhs` is `[M, K]`, `rhs` is `[K, N]`, and `output` must be `[M, N]`.
///
/// # Errors
/// Returns [`TensorError::ShapeMismatch`] if dimensions are incompatible.
pub fn matmul(
    lhs: &TensorView<'_>,
    rhs: &TensorView<'_>,
    output: &mut TensorViewMut<'_>,
) -> Result<(), TensorError> {
    if !lhs.shape().is_matmul_compatible(rhs.shape()) {
        return Err(TensorError::ShapeMismatch {
            op: "matmul",
            lhs: lhs.shape().clone(),
            rhs: rhs.shape().clone(),
        });
    }

    let m = lhs.shape().dims()[0];
    let k = lhs.shape().dims()[1];
    let n = rhs.shape().dims()[1];
    check_output_shape("matmul (output)", &Shape::matrix(m, n), output)?;

    matmul_f32(lhs.as_slice(), rhs.as_slice(), output.as_mut_slice(), m, k, n);
    Ok(())
}

/// Portable f32 matrix multiplication in ikj order, so the inner loop is a
/// saxpy over a contiguous row of `c`.
fn matmul_f32(a: &[f32], b: &[f32], c: &mut [f32], m: usize, k: usize, n: usize) {
    c.iter_mut().for_each(|x| *x = 0.0);

    for i in 0..m {
        let c_row = &mut c[i * n..(i + 1) * n];
        for p in 0..k {
            let a_ip = a[i * k + p];
            let b_row = &b[p * n..(p + 1) * n];
            for (c_ij, &b_pj) in c_row.iter_mut().zip(b_row) {
                *c_ij += a_ip * b_pj;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DType, Tensor};

    #[test]
    fn test_matmul_2x3_times_3x2() {
        // [[1, 2, 3], [4, 5, 6]] @ [[7, 8], [9, 10], [11, 12]] = [[58, 64], [139, 154]]
        let a = Tensor::from_vec(Shape::matrix(2, 3), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let b =
            Tensor::from_vec(Shape::matrix(3, 2), vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]).unwrap();
        let mut c = Tensor::zeros(Shape::matrix(2, 2), DType::F32);

        matmul(&a.view(), &b.view(), &mut c.view_mut()).unwrap();

        assert_eq!(c.as_slice(), &[58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_matmul_into_dirty_output() {
        let a = Tensor::from_vec(Shape::matrix(1, 1), vec![3.0]).unwrap();
        let b = Tensor::from_vec(Shape::matrix(1, 1), vec![4.0]).unwrap();
        let mut c = Tensor::from_vec(Shape::matrix(1, 1), vec![100.0]).unwrap();

        matmul(&a.view(), &b.view(), &mut c.view_mut()).unwrap();
        assert_eq!(c.as_slice(), &[12.0]);
    }

    #[test]
    fn test_matmul_shape_mismatch() {
        let a = Tensor::zeros(Shape::matrix(2, 3), DType::F32);
        let b = Tensor::zeros(Shape::matrix(4, 2), DType::F32);
        let mut c = Tensor::zeros(Shape::matrix(2, 2), DType::F32);

        assert!(matmul(&a.view(), &b.view(), &mut c.view_mut()).is_err());
    }

    #[test]
    fn test_matmul_wrong_output() {
        let a = Tensor::zeros(Shape::matrix(2, 3), DType::F32);
        let b = Tensor::zeros(Shape::matrix(3, 2), DType::F32);
        let mut c = Tensor::zeros(Shape::matrix(3, 3), DType::F32);

        let err = matmul(&a.view(), &b.view(), &mut c.view_mut()).unwrap_err();
        assert!(matches!(err, TensorError::ShapeMismatch { op: "matmul (output)", .. }));
    }
}
