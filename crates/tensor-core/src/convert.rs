// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Conversion between JSON values and tensors.
//!
//! Adapters receive inputs as plain JSON (numbers, nested arrays, booleans).
//! [`Tensor::from_json`] flattens them into row-major storage, inferring the
//! shape from the nesting unless the manifest declares one; [`to_json`]
//! rebuilds nested arrays from a view.

use crate::{DType, Shape, Tensor, TensorError, TensorView};
use serde_json::Value;

impl Tensor {
    /// Builds a tensor from a JSON value.
    ///
    /// - Numbers and booleans become scalars.
    /// - Nested arrays must be rectangular; ragged input is rejected.
    /// - When `declared` is given, the flattened data is reshaped to it
    ///   (resolving one `-1` dimension); otherwise the inferred shape is used.
    pub fn from_json(
        value: &Value,
        dtype: DType,
        declared: Option<&[i64]>,
    ) -> Result<Self, TensorError> {
        let inferred = infer_shape(value)?;
        let mut data = Vec::with_capacity(inferred.num_elements());
        flatten_into(value, &mut data)?;

        let shape = match declared {
            Some(dims) => Shape::from_declared(dims, data.len())?,
            None => inferred,
        };
        Tensor::from_vec_typed(shape, dtype, data)
    }
}

/// Infers the shape of a (possibly nested) JSON array.
pub fn infer_shape(value: &Value) -> Result<Shape, TensorError> {
    let mut dims = Vec::new();
    let mut cursor = value;
    while let Value::Array(items) = cursor {
        dims.push(items.len());
        match items.first() {
            Some(first) => cursor = first,
            None => break,
        }
    }
    let shape = Shape::new(dims);
    check_rectangular(value, shape.dims())?;
    Ok(shape)
}

fn check_rectangular(value: &Value, dims: &[usize]) -> Result<(), TensorError> {
    match (value, dims.split_first()) {
        (Value::Array(items), Some((&len, rest))) => {
            if items.len() != len {
                return Err(TensorError::Conversion(format!(
                    "ragged array: expected {len} elements, found {}",
                    items.len()
                )));
            }
            items.iter().try_for_each(|item| check_rectangular(item, rest))
        }
        (Value::Array(_), None) => Err(TensorError::Conversion(
            "ragged array: unexpected nesting depth".into(),
        )),
        (_, Some(_)) => Err(TensorError::Conversion(
            "ragged array: scalar where an array was expected".into(),
        )),
        (_, None) => Ok(()),
    }
}

fn flatten_into(value: &Value, out: &mut Vec<f32>) -> Result<(), TensorError> {
    match value {
        Value::Array(items) => items.iter().try_for_each(|v| flatten_into(v, out)),
        Value::Number(n) => {
            let v = n.as_f64().ok_or_else(|| {
                TensorError::Conversion(format!("number {n} is not representable"))
            })?;
            out.push(v as f32);
            Ok(())
        }
        Value::Bool(b) => {
            out.push(if *b { 1.0 } else { 0.0 });
            Ok(())
        }
        other => Err(TensorError::Conversion(format!(
            "expected number, boolean or array, found {}",
            json_type_name(other)
        ))),
    }
}

/// Converts a tensor view into nested JSON arrays.
///
/// Rank-0 tensors become plain values. Integer dtypes render as JSON
/// integers, booleans as `true`/`false`, and non-finite floats as `null`.
pub fn to_json(view: &TensorView<'_>) -> Value {
    let data = view.as_slice();
    let dims = view.shape().dims();
    if dims.is_empty() {
        return element_to_json(data.first().copied().unwrap_or(0.0), view.dtype());
    }
    build_nested(data, dims, view.dtype())
}

fn build_nested(data: &[f32], dims: &[usize], dtype: DType) -> Value {
    match dims.split_first() {
        None => element_to_json(data.first().copied().unwrap_or(0.0), dtype),
        Some((&len, [])) => Value::Array(
            data.iter()
                .take(len)
                .map(|&v| element_to_json(v, dtype))
                .collect(),
        ),
        Some((&len, rest)) => {
            let chunk: usize = rest.iter().product();
            Value::Array(
                (0..len)
                    .map(|i| build_nested(&data[i * chunk..(i + 1) * chunk], rest, dtype))
                    .collect(),
            )
        }
    }
}

fn element_to_json(v: f32, dtype: DType) -> Value {
    match dtype {
        DType::Bool => Value::Bool(v != 0.0),
        DType::I32 | DType::I64 if v.is_finite() => Value::from(v as i64),
        _ => serde_json::Number::from_f64(v as f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
    }
}

pub(crate) fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
