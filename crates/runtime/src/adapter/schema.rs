// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Input normalization and output shaping against a bundle's declared I/O.

use crate::RuntimeError;
use model_bundle::IoSpec;
use serde_json::{Map, Value};
use tensor_core::infer_shape;

/// Turns a caller's input into a map keyed by input name and checks it
/// against `specs`.
///
/// # Rules
/// - Without declared inputs an object passes through unchanged; any other
///   value is wrapped as `{"input": value}`.
/// - With exactly one declared input, a value that is not an object keyed
///   by that name is wrapped under it.
/// - Every non-optional input must be present.
/// - Numeric dtypes accept numbers, booleans and (nested) arrays of them;
///   `string` accepts strings; `any` accepts everything.
/// - A declared shape must match in rank; `-1` matches any extent.
///
/// Keys that no spec names are passed through.
pub fn normalize_input(specs: &[IoSpec], input: Value) -> Result<Map<String, Value>, RuntimeError> {
    let map = match (specs, input) {
        ([], Value::Object(map)) => return Ok(map),
        ([], other) => {
            let mut map = Map::new();
            map.insert("input".into(), other);
            return Ok(map);
        }
        ([only], Value::Object(map)) if map.contains_key(&only.name) => map,
        ([only], other) => {
            let mut map = Map::new();
            map.insert(only.name.clone(), other);
            map
        }
        (_, Value::Object(map)) => map,
        (_, other) => {
            return Err(RuntimeError::validation(format!(
                "model takes {} named inputs, got a bare {}",
                specs.len(),
                type_name(&other)
            )))
        }
    };

    for spec in specs {
        match map.get(&spec.name) {
            None | Some(Value::Null) if spec.optional => {}
            None => {
                return Err(RuntimeError::validation(format!(
                    "missing required input '{}'",
                    spec.name
                )))
            }
            Some(value) => check_value(spec, value)?,
        }
    }
    Ok(map)
}

fn check_value(spec: &IoSpec, value: &Value) -> Result<(), RuntimeError> {
    let dtype = spec.dtype.to_ascii_lowercase();
    match dtype.as_str() {
        "any" => {}
        "string" => {
            if !value.is_string() {
                return Err(RuntimeError::validation(format!(
                    "input '{}' expects a string, got {}",
                    spec.name,
                    type_name(value)
                )));
            }
        }
        _ => {
            if !is_numeric(value) {
                return Err(RuntimeError::validation(format!(
                    "input '{}' expects {} values, got {}",
                    spec.name,
                    spec.dtype,
                    type_name(value)
                )));
            }
        }
    }

    if let Some(declared) = &spec.shape {
        let actual = infer_shape(value).map_err(|e| {
            RuntimeError::validation(format!("input '{}': {e}", spec.name))
        })?;
        let dims = actual.dims();
        let matches = dims.len() == declared.len()
            && declared
                .iter()
                .zip(dims)
                .all(|(&want, &got)| want < 0 || want as usize == got);
        if !matches {
            return Err(RuntimeError::validation(format!(
                "input '{}' has shape {:?}, declared {:?}",
                spec.name, dims, declared
            )));
        }
    }
    Ok(())
}

fn is_numeric(value: &Value) -> bool {
    match value {
        Value::Number(_) | Value::Bool(_) => true,
        Value::Array(items) => items.iter().all(is_numeric),
        _ => false,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Shapes a backend's raw result against the declared outputs.
///
/// - No declared outputs: the raw result is returned.
/// - One declared output: an object holding that key is unwrapped,
///   anything else is returned as is.
/// - Several: an object must carry every non-optional name, and an array is
///   zipped onto the names in order. Undeclared keys are dropped.
pub fn shape_output(specs: &[IoSpec], raw: Value) -> Result<Value, RuntimeError> {
    match specs {
        [] => Ok(raw),
        [only] => match raw {
            Value::Object(mut map) if map.contains_key(&only.name) => {
                Ok(map.remove(&only.name).unwrap_or(Value::Null))
            }
            other => Ok(other),
        },
        _ => {
            let mut shaped = Map::new();
            match raw {
                Value::Object(mut map) => {
                    for spec in specs {
                        match map.remove(&spec.name) {
                            Some(value) => {
                                shaped.insert(spec.name.clone(), value);
                            }
                            None if spec.optional => {}
                            None => {
                                return Err(RuntimeError::execution(format!(
                                    "model did not produce output '{}'",
                                    spec.name
                                )))
                            }
                        }
                    }
                }
                Value::Array(items) => {
                    let mut items = items.into_iter();
                    for spec in specs {
                        match items.next() {
                            Some(value) => {
                                shaped.insert(spec.name.clone(), value);
                            }
                            None if spec.optional => {}
                            None => {
                                return Err(RuntimeError::execution(format!(
                                    "model produced too few outputs for '{}'",
                                    spec.name
                                )))
                            }
                        }
                    }
                }
                other => {
                    return Err(RuntimeError::execution(format!(
                        "model declares {} outputs but produced a {}",
                        specs.len(),
                        type_name(&other)
                    )))
                }
            }
            Ok(Value::Object(shaped))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_bare_value_wrapped() {
        let map = normalize_input(&[], json!([1, 2])).unwrap();
        assert_eq!(map["input"], json!([1, 2]));

        let specs = [IoSpec::new("x", "float32")];
        let map = normalize_input(&specs, json!([1, 2])).unwrap();
        assert_eq!(map["x"], json!([1, 2]));

        let map = normalize_input(&specs, json!({"x": 3})).unwrap();
        assert_eq!(map["x"], json!(3));
    }

    #[test]
    fn test_missing_and_optional_inputs() {
        let specs = [IoSpec::new("a", "float32"), IoSpec::new("b", "float32").optional()];
        assert!(normalize_input(&specs, json!({"a": 1})).is_ok());
        let err = normalize_input(&specs, json!({"b": 1})).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.message.contains("'a'"));
    }

    #[test]
    fn test_dtype_checks() {
        let specs = [IoSpec::new("x", "float32")];
        assert!(normalize_input(&specs, json!({"x": "hello"})).is_err());
        let specs = [IoSpec::new("s", "string")];
        assert!(normalize_input(&specs, json!({"s": 1})).is_err());
        let specs = [IoSpec::new("v", "any")];
        assert!(normalize_input(&specs, json!({"v": {"nested": true}})).is_ok());
    }

    #[test]
    fn test_shape_checks() {
        let specs = [IoSpec::new("x", "float32").with_shape(vec![-1, 2])];
        assert!(normalize_input(&specs, json!([[1, 2], [3, 4], [5, 6]])).is_ok());
        assert!(normalize_input(&specs, json!([[1, 2, 3]])).is_err());
        assert!(normalize_input(&specs, json!([1, 2])).is_err());
    }

    #[test]
    fn test_shape_single_output() {
        let specs = [IoSpec::new("y", "float32")];
        assert_eq!(shape_output(&specs, json!({"y": 2.5})).unwrap(), json!(2.5));
        assert_eq!(shape_output(&specs, json!(1.75)).unwrap(), json!(1.75));
    }

    #[test]
    fn test_shape_multiple_outputs() {
        let specs = [IoSpec::new("a", "any"), IoSpec::new("b", "any")];
        assert_eq!(
            shape_output(&specs, json!([1, 2])).unwrap(),
            json!({"a": 1, "b": 2})
        );
        assert_eq!(
            shape_output(&specs, json!({"a": 1, "b": 2, "extra": 3})).unwrap(),
            json!({"a": 1, "b": 2})
        );
        let err = shape_output(&specs, json!({"a": 1})).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Execution);
    }
}
