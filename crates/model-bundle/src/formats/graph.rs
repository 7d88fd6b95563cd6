// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Operator graphs (`*.graph.json`).
//!
//! # Type-State Pattern
//!
//! ```text
//! GraphModel<Loaded>     parsed, not yet checked
//!       │  .validate()
//!       ▼
//! GraphModel<Validated>  every node input resolvable, arities checked,
//!                        graph outputs produced; ready for a session
//! ```
//!
//! Sessions only accept `GraphModel<Validated>`, so an unchecked graph can
//! never be executed.
//!
//! # Format
//! ```json
//! {
//!   "format": "graph-model",
//!   "inputs": ["x"],
//!   "outputs": ["y"],
//!   "initializers": { "w": { "shape": [3, 1], "data": [0.5, 0.5, 0.5] } },
//!   "nodes": [
//!     { "op": "matmul", "inputs": ["x", "w"], "output": "y" }
//!   ]
//! }
//! ```

use crate::BundleError;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tensor_core::Shape;

const FORMAT: &str = "graph-model";

/// Marker: graph has been parsed but not validated.
#[derive(Debug, Clone)]
pub struct Loaded;

/// Marker: graph has been validated and can be executed.
#[derive(Debug, Clone)]
pub struct Validated;

/// Sealed trait for graph states.
pub trait GraphState: fmt::Debug + Clone {}
impl GraphState for Loaded {}
impl GraphState for Validated {}

/// Operators a graph node may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphOp {
    #[serde(alias = "mat_mul")]
    Matmul,
    Add,
    Sub,
    Mul,
    Relu,
    Sigmoid,
    Gelu,
    Softmax,
    LayerNorm,
    /// Multiplies by `attrs.factor`.
    Scale,
    /// Sums every element into a scalar.
    Sum,
    Identity,
}

impl GraphOp {
    /// Inclusive bounds on the number of node inputs.
    pub fn arity(self) -> (usize, usize) {
        match self {
            GraphOp::Matmul | GraphOp::Add | GraphOp::Sub | GraphOp::Mul => (2, 2),
            GraphOp::LayerNorm => (1, 3),
            _ => (1, 1),
        }
    }
}

/// Optional per-node attributes.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NodeAttrs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factor: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epsilon: Option<f32>,
}

/// One operator application.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GraphNode {
    pub op: GraphOp,
    pub inputs: Vec<String>,
    pub output: String,
    #[serde(default)]
    pub attrs: NodeAttrs,
}

/// A constant tensor baked into the graph.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Initializer {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Initializer {
    pub fn shape(&self) -> Shape {
        Shape::new(self.shape.clone())
    }
}

#[derive(serde::Deserialize)]
struct GraphFile {
    #[serde(default)]
    name: Option<String>,
    inputs: Vec<String>,
    outputs: Vec<String>,
    #[serde(default)]
    initializers: BTreeMap<String, Initializer>,
    nodes: Vec<GraphNode>,
}

/// An operator graph. `S` encodes the validation state.
#[derive(Debug, Clone)]
pub struct GraphModel<S: GraphState = Loaded> {
    pub name: Option<String>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub initializers: BTreeMap<String, Initializer>,
    pub nodes: Vec<GraphNode>,
    _state: std::marker::PhantomData<S>,
}

impl GraphModel<Loaded> {
    /// Parses a graph from JSON bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, BundleError> {
        let file: GraphFile = serde_json::from_slice(bytes)
            .map_err(|e| BundleError::invalid(FORMAT, e.to_string()))?;
        Ok(Self {
            name: file.name,
            inputs: file.inputs,
            outputs: file.outputs,
            initializers: file.initializers,
            nodes: file.nodes,
            _state: std::marker::PhantomData,
        })
    }

    /// Validates the graph and transitions to the `Validated` state.
    ///
    /// # Checks
    /// - At least one node and one graph output.
    /// - Initializer data matches its shape.
    /// - Every node input is a graph input, an initializer, or the output of
    ///   an earlier node; no name is produced twice.
    /// - Node arity matches the operator; `scale` carries a factor.
    /// - Every graph output is produced.
    pub fn validate(self) -> Result<GraphModel<Validated>, BundleError> {
        if self.nodes.is_empty() {
            return Err(BundleError::invalid(FORMAT, "graph contains no nodes"));
        }
        if self.outputs.is_empty() {
            return Err(BundleError::invalid(FORMAT, "graph declares no outputs"));
        }

        for (name, init) in &self.initializers {
            let expected = init.shape().num_elements();
            if init.data.len() != expected {
                return Err(BundleError::invalid(
                    FORMAT,
                    format!(
                        "initializer '{name}' has {} values, shape {} needs {expected}",
                        init.data.len(),
                        init.shape()
                    ),
                ));
            }
        }

        let mut defined: HashSet<&str> = self.inputs.iter().map(String::as_str).collect();
        for name in self.initializers.keys() {
            if !defined.insert(name.as_str()) {
                return Err(BundleError::invalid(
                    FORMAT,
                    format!("'{name}' is both a graph input and an initializer"),
                ));
            }
        }

        for (index, node) in self.nodes.iter().enumerate() {
            let (min, max) = node.op.arity();
            if node.inputs.len() < min || node.inputs.len() > max {
                return Err(BundleError::invalid(
                    FORMAT,
                    format!(
                        "node {index} ({:?}) takes {min}..={max} inputs, got {}",
                        node.op,
                        node.inputs.len()
                    ),
                ));
            }
            if node.op == GraphOp::Scale && node.attrs.factor.is_none() {
                return Err(BundleError::invalid(
                    FORMAT,
                    format!("node {index} (scale) is missing attrs.factor"),
                ));
            }
            if let Some(missing) = node.inputs.iter().find(|i| !defined.contains(i.as_str())) {
                return Err(BundleError::invalid(
                    FORMAT,
                    format!("node {index} reads undefined value '{missing}'"),
                ));
            }
            if !defined.insert(node.output.as_str()) {
                return Err(BundleError::invalid(
                    FORMAT,
                    format!("node {index} redefines '{}'", node.output),
                ));
            }
        }

        if let Some(missing) = self.outputs.iter().find(|o| !defined.contains(o.as_str())) {
            return Err(BundleError::invalid(
                FORMAT,
                format!("graph output '{missing}' is never produced"),
            ));
        }

        Ok(GraphModel {
            name: self.name,
            inputs: self.inputs,
            outputs: self.outputs,
            initializers: self.initializers,
            nodes: self.nodes,
            _state: std::marker::PhantomData,
        })
    }
}

impl GraphModel<Validated> {
    /// Index of the last node reading each value.
    ///
    /// Graph outputs are never released, so they map to `usize::MAX`.
    pub fn last_uses(&self) -> HashMap<&str, usize> {
        let mut last = HashMap::new();
        for (index, node) in self.nodes.iter().enumerate() {
            for input in &node.inputs {
                last.insert(input.as_str(), index);
            }
        }
        for output in &self.outputs {
            last.insert(output.as_str(), usize::MAX);
        }
        last
    }

    /// Distinct operators used, in first-use order.
    pub fn ops(&self) -> Vec<GraphOp> {
        let mut seen = Vec::new();
        for node in &self.nodes {
            if !seen.contains(&node.op) {
                seen.push(node.op);
            }
        }
        seen
    }

    /// Bytes held by initializers.
    pub fn initializer_bytes(&self) -> usize {
        self.initializers
            .values()
            .map(|i| i.data.len() * std::mem::size_of::<f32>())
            .sum()
    }
}

impl<S: GraphState> fmt::Display for GraphModel<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "graph '{}' ({} nodes, inputs {:?}, outputs {:?}):",
            self.name.as_deref().unwrap_or("unnamed"),
            self.nodes.len(),
            self.inputs,
            self.outputs
        )?;
        for node in &self.nodes {
            writeln!(f, "  {} = {:?}({})", node.output, node.op, node.inputs.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_json() -> &'static str {
        r#"{
            "format": "graph-model",
            "inputs": ["x"],
            "outputs": ["y"],
            "initializers": {
                "w": { "shape": [2, 2], "data": [1, 0, 0, 1] },
                "b": { "shape": [2], "data": [0.5, -0.5] }
            },
            "nodes": [
                { "op": "matmul", "inputs": ["x", "w"], "output": "h" },
                { "op": "add", "inputs": ["h", "b"], "output": "z" },
                { "op": "relu", "inputs": ["z"], "output": "y" }
            ]
        }"#
    }

    #[test]
    fn test_parse_and_validate() {
        let graph = GraphModel::parse(linear_json().as_bytes())
            .unwrap()
            .validate()
            .unwrap();
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.ops(), vec![GraphOp::Matmul, GraphOp::Add, GraphOp::Relu]);
        assert_eq!(graph.initializer_bytes(), 24);
    }

    #[test]
    fn test_last_uses() {
        let graph = GraphModel::parse(linear_json().as_bytes())
            .unwrap()
            .validate()
            .unwrap();
        let last = graph.last_uses();
        assert_eq!(last["h"], 1);
        assert_eq!(last["z"], 2);
        assert_eq!(last["y"], usize::MAX);
    }

    #[test]
    fn test_undefined_input_rejected() {
        let json = linear_json().replace(r#"["h", "b"]"#, r#"["h", "bias"]"#);
        let err = GraphModel::parse(json.as_bytes()).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("undefined value 'bias'"));
    }

    #[test]
    fn test_bad_initializer_rejected() {
        let json = linear_json().replace("[0.5, -0.5]", "[0.5]");
        assert!(GraphModel::parse(json.as_bytes()).unwrap().validate().is_err());
    }

    #[test]
    fn test_scale_requires_factor() {
        let json = r#"{"inputs":["x"],"outputs":["y"],
            "nodes":[{"op":"scale","inputs":["x"],"output":"y"}]}"#;
        assert!(GraphModel::parse(json.as_bytes()).unwrap().validate().is_err());
    }

    #[test]
    fn test_unknown_op_is_parse_error() {
        let json = r#"{"inputs":["x"],"outputs":["y"],
            "nodes":[{"op":"conv2d","inputs":["x"],"output":"y"}]}"#;
        assert!(GraphModel::parse(json.as_bytes()).is_err());
    }

    #[test]
    fn test_missing_output() {
        let json = r#"{"inputs":["x"],"outputs":["q"],
            "nodes":[{"op":"relu","inputs":["x"],"output":"y"}]}"#;
        assert!(GraphModel::parse(json.as_bytes()).unwrap().validate().is_err());
    }
}
