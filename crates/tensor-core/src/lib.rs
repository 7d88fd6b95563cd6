// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-core
//!
//! Tensor types and portable compute kernels shared by the polyrt backends.
//!
//! This crate provides:
//! - [`Tensor`]: an owned n-dimensional tensor with `f32` storage and a
//!   logical element type ([`DType`]) taken from the model manifest.
//! - [`TensorView`] / [`TensorViewMut`] are borrowed views, so kernels can run
//!   over pooled buffers without copying them into a `Tensor` first.
//! - [`Shape`] holds dimension descriptors with stride and broadcast helpers.
//! - JSON conversion ([`Tensor::from_json`], [`to_json`]) used at the adapter
//!   boundary, where inputs arrive as nested arrays.
//! - Kernels: matrix multiplication, softmax, layer normalisation, GELU and
//!   broadcasting elementwise operations.
//!
//! # Kernel Convention
//! Every kernel writes into a caller-provided output view. Callers decide
//! where the output lives (an owned tensor or a pooled buffer), which keeps
//! allocation policy out of the kernels.

mod convert;
mod dtype;
mod error;
mod ops;
mod shape;
mod tensor;

pub use convert::{infer_shape, to_json};
pub use dtype::DType;
pub use error::TensorError;
pub use ops::{
    binary, broadcast_shape, gelu, layer_norm, matmul, softmax, sum_all, unary, BinaryOp,
    UnaryOp,
};
pub use shape::Shape;
pub use tensor::{Tensor, TensorView, TensorViewMut};
