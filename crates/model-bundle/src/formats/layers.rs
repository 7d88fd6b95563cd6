// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Layered (sequential) models.
//!
//! # Format
//! ```json
//! {
//!   "format": "layers-model",
//!   "input": "x",
//!   "output": "y",
//!   "layers": [
//!     { "type": "dense", "units": 2, "weights": [[1, 0], [0, 1], [1, 1]],
//!       "bias": [0, 0], "activation": "relu" },
//!     { "type": "softmax" }
//!   ]
//! }
//! ```
//!
//! Dense weights are `[in_features][units]`, so `y = x · W + b`.

use crate::BundleError;

const FORMAT: &str = "layers-model";

/// Activation functions usable standalone or fused into a dense layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Linear,
    Relu,
    Sigmoid,
    Tanh,
    Gelu,
}

fn default_epsilon() -> f32 {
    1e-5
}

/// One layer of a sequential model.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Layer {
    Dense {
        units: usize,
        weights: Vec<Vec<f32>>,
        #[serde(default)]
        bias: Option<Vec<f32>>,
        #[serde(default)]
        activation: Option<Activation>,
    },
    Activation {
        activation: Activation,
    },
    Softmax,
    LayerNorm {
        #[serde(default = "default_epsilon")]
        epsilon: f32,
    },
}

impl Layer {
    pub fn kind(&self) -> &'static str {
        match self {
            Layer::Dense { .. } => "dense",
            Layer::Activation { .. } => "activation",
            Layer::Softmax => "softmax",
            Layer::LayerNorm { .. } => "layer_norm",
        }
    }
}

fn default_input() -> String {
    "input".to_string()
}

fn default_output() -> String {
    "output".to_string()
}

/// A validated sequential model.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LayersModel {
    #[serde(default = "default_input")]
    pub input: String,
    #[serde(default = "default_output")]
    pub output: String,
    pub layers: Vec<Layer>,
}

impl LayersModel {
    /// Parses and validates a layered model.
    ///
    /// # Checks
    /// - At least one layer.
    /// - Dense layers have a non-empty weight matrix whose rows all hold
    ///   `units` values, and a bias of `units` values when present.
    /// - Consecutive dense layers chain: a dense layer's input width equals
    ///   the previous dense layer's `units`.
    pub fn parse(bytes: &[u8]) -> Result<Self, BundleError> {
        let model: Self = serde_json::from_slice(bytes)
            .map_err(|e| BundleError::invalid(FORMAT, e.to_string()))?;
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<(), BundleError> {
        if self.layers.is_empty() {
            return Err(BundleError::invalid(FORMAT, "model contains no layers"));
        }

        let mut width: Option<usize> = None;
        for (index, layer) in self.layers.iter().enumerate() {
            if let Layer::Dense {
                units,
                weights,
                bias,
                ..
            } = layer
            {
                if *units == 0 || weights.is_empty() {
                    return Err(BundleError::invalid(
                        FORMAT,
                        format!("dense layer {index} has an empty weight matrix"),
                    ));
                }
                if let Some(row) = weights.iter().position(|r| r.len() != *units) {
                    return Err(BundleError::invalid(
                        FORMAT,
                        format!("dense layer {index}: weight row {row} does not have {units} values"),
                    ));
                }
                if let Some(b) = bias {
                    if b.len() != *units {
                        return Err(BundleError::invalid(
                            FORMAT,
                            format!("dense layer {index}: bias has {} values, expected {units}", b.len()),
                        ));
                    }
                }
                if let Some(prev) = width {
                    if prev != weights.len() {
                        return Err(BundleError::invalid(
                            FORMAT,
                            format!(
                                "dense layer {index} expects {} features but receives {prev}",
                                weights.len()
                            ),
                        ));
                    }
                }
                width = Some(*units);
            }
        }
        Ok(())
    }

    /// Input width expected by the first dense layer, if any.
    pub fn input_features(&self) -> Option<usize> {
        self.layers.iter().find_map(|layer| match layer {
            Layer::Dense { weights, .. } => Some(weights.len()),
            _ => None,
        })
    }

    /// Number of trainable parameters.
    pub fn parameter_count(&self) -> usize {
        self.layers
            .iter()
            .map(|layer| match layer {
                Layer::Dense { weights, bias, .. } => {
                    weights.iter().map(Vec::len).sum::<usize>() + bias.as_ref().map_or(0, Vec::len)
                }
                _ => 0,
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MLP: &str = r#"{
        "format": "layers-model",
        "layers": [
            { "type": "dense", "units": 2, "weights": [[1, 0], [0, 1], [1, 1]], "bias": [0, 0], "activation": "relu" },
            { "type": "dense", "units": 1, "weights": [[1], [1]] },
            { "type": "activation", "activation": "sigmoid" }
        ]
    }"#;

    #[test]
    fn test_parse_mlp() {
        let model = LayersModel::parse(MLP.as_bytes()).unwrap();
        assert_eq!(model.layers.len(), 3);
        assert_eq!(model.input, "input");
        assert_eq!(model.input_features(), Some(3));
        assert_eq!(model.parameter_count(), 6 + 2 + 2);
        assert_eq!(model.layers[2].kind(), "activation");
    }

    #[test]
    fn test_broken_chain_rejected() {
        let json = MLP.replace(r#""weights": [[1], [1]]"#, r#""weights": [[1], [1], [1]]"#);
        let err = LayersModel::parse(json.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("expects 3 features but receives 2"));
    }

    #[test]
    fn test_ragged_weights_rejected() {
        let json = r#"{"layers":[{"type":"dense","units":2,"weights":[[1,2],[3]]}]}"#;
        assert!(LayersModel::parse(json.as_bytes()).is_err());
    }

    #[test]
    fn test_layer_norm_default_epsilon() {
        let json = r#"{"layers":[{"type":"layer_norm"},{"type":"softmax"}]}"#;
        let model = LayersModel::parse(json.as_bytes()).unwrap();
        assert_eq!(model.layers[0], Layer::LayerNorm { epsilon: 1e-5 });
    }

    #[test]
    fn test_unknown_layer_type() {
        let json = r#"{"layers":[{"type":"conv2d"}]}"#;
        assert!(LayersModel::parse(json.as_bytes()).is_err());
    }
}
