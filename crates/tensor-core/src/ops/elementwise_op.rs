// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Element-wise unary and binary operations with broadcasting.

use super::{check_output_shape, check_same_shape};
use crate::{Shape, TensorError, TensorView, TensorViewMut};

/// Element-wise unary operations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Relu,
    Sigmoid,
    Tanh,
    Neg,
    Abs,
    Exp,
    /// Multiplies every element by a constant.
    Scale(f32),
}

impl UnaryOp {
    #[inline]
    pub fn apply(self, x: f32) -> f32 {
        match self {
            UnaryOp::Relu => x.max(0.0),
            UnaryOp::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            UnaryOp::Tanh => x.tanh(),
            UnaryOp::Neg => -x,
            UnaryOp::Abs => x.abs(),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Scale(f) => x * f,
        }
    }
}

/// Element-wise binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Max,
}

impl BinaryOp {
    #[inline]
    pub fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Max => a.max(b),
        }
    }

    fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Max => "max",
        }
    }
}

/// Computes the broadcast shape of two operands.
///
/// Dimensions are aligned from the right; each pair must be equal or
/// contain a 1.
///
/// # Examples
/// ```
/// use tensor_core::{broadcast_shape, Shape};
/// let s = broadcast_shape(&Shape::matrix(2, 3), &Shape::vector(3)).unwrap();
/// assert_eq!(s, Shape::matrix(2, 3));
/// ```
pub fn broadcast_shape(lhs: &Shape, rhs: &Shape) -> Option<Shape> {
    let rank = lhs.rank().max(rhs.rank());
    let mut dims = vec![0; rank];
    for (i, d) in dims.iter_mut().enumerate() {
        let a = dim_from_right(lhs, rank - 1 - i);
        let b = dim_from_right(rhs, rank - 1 - i);
        *d = match (a, b) {
            (a, b) if a == b => a,
            (1, b) => b,
            (a, 1) => a,
            _ => return None,
        };
    }
    Some(Shape::new(dims))
}

fn dim_from_right(shape: &Shape, offset: usize) -> usize {
    let dims = shape.dims();
    if offset < dims.len() {
        dims[dims.len() - 1 - offset]
    } else {
        1
    }
}

/// Applies `op` element-wise, writing into `output`.
pub fn unary(
    op: UnaryOp,
    input: &TensorView<'_>,
    output: &mut TensorViewMut<'_>,
) -> Result<(), TensorError> {
    check_same_shape("unary", input, output)?;
    for (d, &x) in output.as_mut_slice().iter_mut().zip(input.as_slice()) {
        *d = op.apply(x);
    }
    Ok(())
}

/// Applies `op` to two operands with broadcasting.
///
/// `output` must have the broadcast shape of `lhs` and `rhs`.
pub fn binary(
    op: BinaryOp,
    lhs: &TensorView<'_>,
    rhs: &TensorView<'_>,
    output: &mut TensorViewMut<'_>,
) -> Result<(), TensorError> {
    let shape = broadcast_shape(lhs.shape(), rhs.shape()).ok_or_else(|| {
        TensorError::ShapeMismatch {
            op: op.name(),
            lhs: lhs.shape().clone(),
            rhs: rhs.shape().clone(),
        }
    })?;
    check_output_shape(op.name(), &shape, output)?;

    let a = lhs.as_slice();
    let b = rhs.as_slice();
    let dst = output.as_mut_slice();

    if lhs.shape() == rhs.shape() {
        for ((d, &x), &y) in dst.iter_mut().zip(a).zip(b) {
            *d = op.apply(x, y);
        }
        return Ok(());
    }

    let out_strides = shape.strides();
    let a_strides = broadcast_strides(lhs.shape(), &shape);
    let b_strides = broadcast_strides(rhs.shape(), &shape);
    for (flat, d) in dst.iter_mut().enumerate() {
        let mut rem = flat;
        let (mut ai, mut bi) = (0, 0);
        for (axis, &stride) in out_strides.iter().enumerate() {
            let idx = rem / stride;
            rem %= stride;
            ai += idx * a_strides[axis];
            bi += idx * b_strides[axis];
        }
        *d = op.apply(a[ai], b[bi]);
    }
    Ok(())
}

/// Strides of `shape` laid out against `target`, with 0 on broadcast axes.
fn broadcast_strides(shape: &Shape, target: &Shape) -> Vec<usize> {
    let own = shape.strides();
    let offset = target.rank() - shape.rank();
    (0..target.rank())
        .map(|axis| {
            if axis < offset || shape.dims()[axis - offset] == 1 {
                0
            } else {
                own[axis - offset]
            }
        })
        .collect()
}

/// Sums every element.
pub fn sum_all(input: &TensorView<'_>) -> f32 {
    input.as_slice().iter().sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DType, Tensor};

    #[test]
    fn test_broadcast_shape_rules() {
        assert_eq!(
            broadcast_shape(&Shape::new(vec![4, 1]), &Shape::vector(3)),
            Some(Shape::matrix(4, 3))
        );
        assert_eq!(
            broadcast_shape(&Shape::scalar(), &Shape::vector(5)),
            Some(Shape::vector(5))
        );
        assert_eq!(broadcast_shape(&Shape::vector(2), &Shape::vector(3)), None);
    }

    #[test]
    fn test_binary_row_broadcast() {
        let a = Tensor::from_vec(Shape::matrix(2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let bias = Tensor::from_vec(Shape::vector(2), vec![10.0, 20.0]).unwrap();
        let mut out = Tensor::zeros(Shape::matrix(2, 2), DType::F32);
        binary(BinaryOp::Add, &a.view(), &bias.view(), &mut out.view_mut()).unwrap();
        assert_eq!(out.as_slice(), &[11.0, 22.0, 13.0, 24.0]);
    }

    #[test]
    fn test_binary_column_broadcast() {
        let a = Tensor::from_vec(Shape::new(vec![2, 1]), vec![1.0, 2.0]).unwrap();
        let b = Tensor::from_vec(Shape::vector(3), vec![1.0, 2.0, 3.0]).unwrap();
        let mut out = Tensor::zeros(Shape::matrix(2, 3), DType::F32);
        binary(BinaryOp::Mul, &a.view(), &b.view(), &mut out.view_mut()).unwrap();
        assert_eq!(out.as_slice(), &[1.0, 2.0, 3.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_binary_incompatible() {
        let a = Tensor::zeros(Shape::vector(2), DType::F32);
        let b = Tensor::zeros(Shape::vector(3), DType::F32);
        let mut out = Tensor::zeros(Shape::vector(3), DType::F32);
        assert!(binary(BinaryOp::Sub, &a.view(), &b.view(), &mut out.view_mut()).is_err());
    }

    #[test]
    fn test_unary_ops() {
        let x = Tensor::from_vec(Shape::vector(3), vec![-1.0, 0.0, 2.0]).unwrap();
        let mut y = Tensor::zeros(Shape::vector(3), DType::F32);
        unary(UnaryOp::Relu, &x.view(), &mut y.view_mut()).unwrap();
        assert_eq!(y.as_slice(), &[0.0, 0.0, 2.0]);
        unary(UnaryOp::Scale(0.5), &x.view(), &mut y.view_mut()).unwrap();
        assert_eq!(y.as_slice(), &[-0.5, 0.0, 1.0]);
        assert_eq!(UnaryOp::Sigmoid.apply(0.0), 0.5);
    }

    #[test]
    fn test_sum_all() {
        let x = Tensor::from_vec(Shape::matrix(2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(sum_all(&x.view()), 10.0);
    }
}
