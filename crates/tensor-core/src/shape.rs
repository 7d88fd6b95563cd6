// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor shape descriptors and dimension utilities.

use crate::TensorError;
use std::fmt;

/// Describes the dimensionality of a [`crate::Tensor`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Creates a new shape from the given dimensions.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::Shape;
    /// let s = Shape::new(vec![2, 3, 4]);
    /// assert_eq!(s.rank(), 3);
    /// assert_eq!(s.num_elements(), 24);
    /// ```
    pub fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    /// Creates a scalar shape (rank 0).
    pub fn scalar() -> Self {
        Self { dims: vec![] }
    }

    /// Creates a 1-D shape.
    pub fn vector(len: usize) -> Self {
        Self { dims: vec![len] }
    }

    /// Creates a 2-D shape (matrix).
    pub fn matrix(rows: usize, cols: usize) -> Self {
        Self {
            dims: vec![rows, cols],
        }
    }

    /// Resolves a manifest-declared shape against a concrete element count.
    ///
    /// Declared shapes use `-1` for dynamic dimensions. At most one dynamic
    /// dimension is inferred from `num_elements`; with more than one the
    /// declared shape cannot be resolved and an error is returned.
    pub fn from_declared(declared: &[i64], num_elements: usize) -> Result<Self, TensorError> {
        let dynamic = declared.iter().filter(|&&d| d < 0).count();
        let fixed: usize = declared
            .iter()
            .filter(|&&d| d >= 0)
            .map(|&d| d as usize)
            .product();

        let dims: Vec<usize> = match dynamic {
            0 => declared.iter().map(|&d| d as usize).collect(),
            1 if fixed > 0 && num_elements % fixed == 0 => declared
                .iter()
                .map(|&d| if d < 0 { num_elements / fixed } else { d as usize })
                .collect(),
            _ => {
                return Err(TensorError::Conversion(format!(
                    "cannot resolve declared shape {declared:?} for {num_elements} elements"
                )))
            }
        };

        let shape = Self::new(dims);
        if shape.num_elements() != num_elements {
            return Err(TensorError::ElementCountMismatch {
                expected: shape.num_elements(),
                shape,
                actual: num_elements,
            });
        }
        Ok(shape)
    }

    /// Returns the number of dimensions (rank).
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Returns the total number of elements.
    ///
    /// For a scalar shape (rank 0), returns 1.
    pub fn num_elements(&self) -> usize {
        if self.dims.is_empty() {
            1
        } else {
            self.dims.iter().product()
        }
    }

    /// Returns the dimensions as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Returns the last dimension, or 1 for scalars.
    pub fn last_dim(&self) -> usize {
        self.dims.last().copied().unwrap_or(1)
    }

    /// Computes row-major (C-order) strides for this shape.
    pub fn strides(&self) -> Vec<usize> {
        let rank = self.dims.len();
        let mut strides = vec![1usize; rank];
        for i in (0..rank.saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.dims[i + 1];
        }
        strides
    }

    /// Returns `true` if the shapes are compatible for a matrix multiply:
    /// `self` is `[M, K]` and `other` is `[K, N]`.
    pub fn is_matmul_compatible(&self, other: &Shape) -> bool {
        self.rank() == 2 && other.rank() == 2 && self.dims[1] == other.dims[0]
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self::new(dims.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_shape() {
        let s = Shape::scalar();
        assert_eq!(s.rank(), 0);
        assert_eq!(s.num_elements(), 1);
        assert!(s.strides().is_empty());
        assert_eq!(s.last_dim(), 1);
    }

    #[test]
    fn test_strides() {
        assert_eq!(Shape::vector(5).strides(), vec![1]);
        assert_eq!(Shape::matrix(3, 4).strides(), vec![4, 1]);
        assert_eq!(Shape::new(vec![2, 3, 4]).strides(), vec![12, 4, 1]);
    }

    #[test]
    fn test_declared_static() {
        let s = Shape::from_declared(&[2, 3], 6).unwrap();
        assert_eq!(s, Shape::matrix(2, 3));
        assert!(Shape::from_declared(&[2, 3], 5).is_err());
    }

    #[test]
    fn test_declared_dynamic_batch() {
        let s = Shape::from_declared(&[-1, 4], 12).unwrap();
        assert_eq!(s, Shape::matrix(3, 4));
    }

    #[test]
    fn test_declared_two_dynamic_dims() {
        assert!(Shape::from_declared(&[-1, -1], 12).is_err());
    }

    #[test]
    fn test_matmul_compatible() {
        assert!(Shape::matrix(3, 4).is_matmul_compatible(&Shape::matrix(4, 5)));
        assert!(!Shape::matrix(3, 4).is_matmul_compatible(&Shape::matrix(5, 5)));
        assert!(!Shape::vector(4).is_matmul_compatible(&Shape::matrix(4, 5)));
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Shape::new(vec![2, 3, 4])), "[2, 3, 4]");
        assert_eq!(format!("{}", Shape::scalar()), "[]");
    }
}
