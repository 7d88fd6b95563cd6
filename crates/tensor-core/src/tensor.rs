// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Core tensor type and view abstractions.

use crate::{DType, Shape, TensorError};

/// An owned, n-dimensional tensor stored in contiguous row-major memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Shape,
    dtype: DType,
    data: Vec<f32>,
}

impl Tensor {
    /// Creates a new tensor filled with zeros.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{Tensor, Shape, DType};
    /// let t = Tensor::zeros(Shape::matrix(2, 3), DType::F32);
    /// assert_eq!(t.len(), 6);
    /// ```
    pub fn zeros(shape: Shape, dtype: DType) -> Self {
        let n = shape.num_elements();
        Self {
            shape,
            dtype,
            data: vec![0.0; n],
        }
    }

    /// Creates an `F32` tensor from a vector of values.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{Tensor, Shape};
    /// let t = Tensor::from_vec(Shape::vector(3), vec![1.0, 2.0, 3.0]).unwrap();
    /// assert_eq!(t.as_slice(), &[1.0, 2.0, 3.0]);
    /// ```
    pub fn from_vec(shape: Shape, data: Vec<f32>) -> Result<Self, TensorError> {
        Self::from_vec_typed(shape, DType::F32, data)
    }

    /// Creates a tensor of the given dtype, coercing every value into it.
    pub fn from_vec_typed(shape: Shape, dtype: DType, mut data: Vec<f32>) -> Result<Self, TensorError> {
        if data.len() != shape.num_elements() {
            return Err(TensorError::ElementCountMismatch {
                expected: shape.num_elements(),
                shape,
                actual: data.len(),
            });
        }
        if dtype != DType::F32 {
            data.iter_mut().for_each(|v| *v = dtype.coerce(*v));
        }
        Ok(Self { shape, dtype, data })
    }

    /// Creates a rank-0 tensor.
    pub fn scalar(value: f32) -> Self {
        Self {
            shape: Shape::scalar(),
            dtype: DType::F32,
            data: vec![value],
        }
    }

    /// Returns the tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the tensor's logical data type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Returns the number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` when the tensor holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the element storage.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Returns the element storage mutably.
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Consumes the tensor and returns its storage.
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Returns an immutable view over this tensor's data.
    pub fn view(&self) -> TensorView<'_> {
        TensorView {
            shape: &self.shape,
            dtype: self.dtype,
            data: &self.data,
        }
    }

    /// Returns a mutable view over this tensor's data.
    pub fn view_mut(&mut self) -> TensorViewMut<'_> {
        TensorViewMut {
            shape: &self.shape,
            dtype: self.dtype,
            data: &mut self.data,
        }
    }

    /// Returns a tensor with the same data and a new shape.
    pub fn reshape(self, shape: Shape) -> Result<Self, TensorError> {
        if shape.num_elements() != self.data.len() {
            return Err(TensorError::ElementCountMismatch {
                expected: shape.num_elements(),
                shape,
                actual: self.data.len(),
            });
        }
        Ok(Self { shape, ..self })
    }
}

/// A borrowed, read-only view over tensor data.
///
/// Views may point into an owned [`Tensor`] or into any other `f32` storage
/// (pooled buffers, device staging buffers) via [`TensorView::from_parts`].
#[derive(Debug, Clone, Copy)]
pub struct TensorView<'a> {
    shape: &'a Shape,
    dtype: DType,
    data: &'a [f32],
}

impl<'a> TensorView<'a> {
    /// Creates a view from raw parts.
    ///
    /// `data` may be longer than the shape requires (pooled buffers are
    /// rounded up to a size class); only the leading elements are viewed.
    pub fn from_parts(shape: &'a Shape, dtype: DType, data: &'a [f32]) -> Result<Self, TensorError> {
        let n = shape.num_elements();
        if data.len() < n {
            return Err(TensorError::ElementCountMismatch {
                shape: shape.clone(),
                expected: n,
                actual: data.len(),
            });
        }
        Ok(Self {
            shape,
            dtype,
            data: &data[..n],
        })
    }

    /// Returns the shape of the viewed tensor.
    pub fn shape(&self) -> &'a Shape {
        self.shape
    }

    /// Returns the data type of the viewed tensor.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Returns the viewed elements.
    pub fn as_slice(&self) -> &'a [f32] {
        self.data
    }

    /// Copies the view into an owned tensor.
    pub fn to_tensor(&self) -> Tensor {
        Tensor {
            shape: self.shape.clone(),
            dtype: self.dtype,
            data: self.data.to_vec(),
        }
    }
}

/// A borrowed, writable view used as kernel output.
#[derive(Debug)]
pub struct TensorViewMut<'a> {
    shape: &'a Shape,
    dtype: DType,
    data: &'a mut [f32],
}

impl<'a> TensorViewMut<'a> {
    /// Creates a mutable view from raw parts. Extra trailing storage is ignored.
    pub fn from_parts(
        shape: &'a Shape,
        dtype: DType,
        data: &'a mut [f32],
    ) -> Result<Self, TensorError> {
        let n = shape.num_elements();
        if data.len() < n {
            return Err(TensorError::ElementCountMismatch {
                shape: shape.clone(),
                expected: n,
                actual: data.len(),
            });
        }
        Ok(Self {
            shape,
            dtype,
            data: &mut data[..n],
        })
    }

    /// Returns the shape of the output.
    pub fn shape(&self) -> &Shape {
        self.shape
    }

    /// Returns the logical dtype of the output.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Returns the writable elements.
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut *self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros() {
        let t = Tensor::zeros(Shape::matrix(2, 3), DType::F32);
        assert_eq!(t.len(), 6);
        assert_eq!(t.shape(), &Shape::matrix(2, 3));
        assert!(t.as_slice().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_from_vec_count_mismatch() {
        let result = Tensor::from_vec(Shape::matrix(2, 3), vec![0.0; 5]);
        assert!(matches!(result, Err(TensorError::ElementCountMismatch { .. })));
    }

    #[test]
    fn test_typed_coercion() {
        let t = Tensor::from_vec_typed(Shape::vector(3), DType::I32, vec![1.4, 1.6, -2.5]).unwrap();
        assert_eq!(t.as_slice(), &[1.0, 2.0, -3.0]);
    }

    #[test]
    fn test_view_over_longer_storage() {
        let shape = Shape::vector(2);
        let storage = [1.0, 2.0, 99.0, 99.0];
        let v = TensorView::from_parts(&shape, DType::F32, &storage).unwrap();
        assert_eq!(v.as_slice(), &[1.0, 2.0]);
        assert_eq!(v.to_tensor().len(), 2);
    }

    #[test]
    fn test_view_mut_too_short() {
        let shape = Shape::vector(4);
        let mut storage = [0.0; 3];
        assert!(TensorViewMut::from_parts(&shape, DType::F32, &mut storage).is_err());
    }

    #[test]
    fn test_reshape() {
        let t = Tensor::from_vec(Shape::vector(6), vec![0.0; 6]).unwrap();
        let r = t.reshape(Shape::matrix(3, 2)).unwrap();
        assert_eq!(r.shape(), &Shape::matrix(3, 2));
    }
}
