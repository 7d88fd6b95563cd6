// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Compute programs for the compute-shader backend.
//!
//! A program is a chain of elementwise stages over equally sized `f32`
//! arrays. Each stage becomes one generated kernel.
//!
//! # Format
//! ```json
//! {
//!   "format": "compute-program",
//!   "workgroup_size": 64,
//!   "inputs": ["a", "b"],
//!   "output": "out",
//!   "stages": [{ "op": "add", "inputs": ["a", "b"], "output": "out" }]
//! }
//! ```
//!
//! Bundles without a program can still target the backend by listing their
//! `operations` (for example `["add", "scale:0.5"]`); see
//! [`ComputeProgram::from_operations`].

use crate::BundleError;
use std::collections::HashSet;

const FORMAT: &str = "compute-program";

/// Largest workgroup size a program may request.
pub const MAX_WORKGROUP_SIZE: u32 = 256;

/// The fixed kernel set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeOp {
    Add,
    Sub,
    Mul,
    Div,
    Relu,
    Sigmoid,
    /// Multiplies by the stage's `factor`.
    Scale,
    Neg,
}

impl ComputeOp {
    /// Looks up a kernel by name. A `scale:<factor>` suffix is ignored here.
    pub fn from_name(name: &str) -> Option<Self> {
        let base = name.split(':').next().unwrap_or(name);
        match base.trim().to_ascii_lowercase().as_str() {
            "add" => Some(Self::Add),
            "sub" | "subtract" => Some(Self::Sub),
            "mul" | "multiply" => Some(Self::Mul),
            "div" | "divide" => Some(Self::Div),
            "relu" => Some(Self::Relu),
            "sigmoid" => Some(Self::Sigmoid),
            "scale" => Some(Self::Scale),
            "neg" | "negate" => Some(Self::Neg),
            _ => None,
        }
    }

    /// Number of array operands.
    pub fn arity(self) -> usize {
        match self {
            Self::Add | Self::Sub | Self::Mul | Self::Div => 2,
            Self::Relu | Self::Sigmoid | Self::Scale | Self::Neg => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Relu => "relu",
            Self::Sigmoid => "sigmoid",
            Self::Scale => "scale",
            Self::Neg => "neg",
        }
    }
}

/// One kernel invocation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ComputeStage {
    pub op: ComputeOp,
    pub inputs: Vec<String>,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factor: Option<f32>,
}

/// A validated chain of compute stages.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ComputeProgram {
    /// Requested workgroup size; the device default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workgroup_size: Option<u32>,
    pub inputs: Vec<String>,
    pub output: String,
    pub stages: Vec<ComputeStage>,
}

impl ComputeProgram {
    /// Parses and validates a program.
    pub fn parse(bytes: &[u8]) -> Result<Self, BundleError> {
        let program: Self = serde_json::from_slice(bytes)
            .map_err(|e| BundleError::invalid(FORMAT, e.to_string()))?;
        program.validate()?;
        Ok(program)
    }

    /// Synthesizes a linear program from a list of operation names.
    ///
    /// The first stage reads `inputs[0]`; every binary stage consumes the
    /// next unused input as its right operand. `scale` needs a factor,
    /// written `scale:<factor>`.
    pub fn from_operations(
        operations: &[String],
        inputs: &[String],
        output: &str,
    ) -> Result<Self, BundleError> {
        let first = inputs
            .first()
            .ok_or_else(|| BundleError::invalid(FORMAT, "no inputs to operate on"))?;
        let mut current = first.clone();
        let mut next_input = 1;
        let mut stages = Vec::with_capacity(operations.len());

        for (index, name) in operations.iter().enumerate() {
            let op = ComputeOp::from_name(name).ok_or_else(|| {
                BundleError::invalid(FORMAT, format!("'{name}' is not a compute kernel"))
            })?;
            let factor = match op {
                ComputeOp::Scale => Some(parse_factor(name)?),
                _ => None,
            };
            let mut stage_inputs = vec![current.clone()];
            if op.arity() == 2 {
                let rhs = inputs.get(next_input).ok_or_else(|| {
                    BundleError::invalid(
                        FORMAT,
                        format!("operation '{name}' needs a second input, none left"),
                    )
                })?;
                stage_inputs.push(rhs.clone());
                next_input += 1;
            }
            let stage_output = if index + 1 == operations.len() {
                output.to_string()
            } else {
                format!("_t{index}")
            };
            current = stage_output.clone();
            stages.push(ComputeStage {
                op,
                inputs: stage_inputs,
                output: stage_output,
                factor,
            });
        }

        let program = Self {
            workgroup_size: None,
            inputs: inputs.to_vec(),
            output: output.to_string(),
            stages,
        };
        program.validate()?;
        Ok(program)
    }

    fn validate(&self) -> Result<(), BundleError> {
        if self.stages.is_empty() {
            return Err(BundleError::invalid(FORMAT, "program contains no stages"));
        }
        if let Some(size) = self.workgroup_size {
            if size == 0 || size > MAX_WORKGROUP_SIZE {
                return Err(BundleError::invalid(
                    FORMAT,
                    format!("workgroup size {size} outside 1..={MAX_WORKGROUP_SIZE}"),
                ));
            }
        }

        let mut defined: HashSet<&str> = self.inputs.iter().map(String::as_str).collect();
        for (index, stage) in self.stages.iter().enumerate() {
            if stage.inputs.len() != stage.op.arity() {
                return Err(BundleError::invalid(
                    FORMAT,
                    format!(
                        "stage {index} ({}) takes {} inputs, got {}",
                        stage.op.as_str(),
                        stage.op.arity(),
                        stage.inputs.len()
                    ),
                ));
            }
            if stage.op == ComputeOp::Scale && stage.factor.is_none() {
                return Err(BundleError::invalid(
                    FORMAT,
                    format!("stage {index} (scale) is missing a factor"),
                ));
            }
            if let Some(missing) = stage.inputs.iter().find(|i| !defined.contains(i.as_str())) {
                return Err(BundleError::invalid(
                    FORMAT,
                    format!("stage {index} reads undefined array '{missing}'"),
                ));
            }
            defined.insert(stage.output.as_str());
        }

        if !defined.contains(self.output.as_str()) {
            return Err(BundleError::invalid(
                FORMAT,
                format!("program output '{}' is never written", self.output),
            ));
        }
        Ok(())
    }

    /// Returns `true` when every name in `operations` is a known kernel.
    pub fn supports_all(operations: &[String]) -> bool {
        !operations.is_empty() && operations.iter().all(|op| ComputeOp::from_name(op).is_some())
    }
}

fn parse_factor(name: &str) -> Result<f32, BundleError> {
    name.split_once(':')
        .and_then(|(_, f)| f.trim().parse().ok())
        .ok_or_else(|| {
            BundleError::invalid(FORMAT, format!("'{name}' needs a factor, e.g. 'scale:0.5'"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_add_program() {
        let json = r#"{
            "format": "compute-program",
            "workgroup_size": 64,
            "inputs": ["a", "b"],
            "output": "out",
            "stages": [{ "op": "add", "inputs": ["a", "b"], "output": "out" }]
        }"#;
        let program = ComputeProgram::parse(json.as_bytes()).unwrap();
        assert_eq!(program.workgroup_size, Some(64));
        assert_eq!(program.stages[0].op, ComputeOp::Add);
    }

    #[test]
    fn test_invalid_programs() {
        let oversized = r#"{"workgroup_size":1024,"inputs":["a"],"output":"o",
            "stages":[{"op":"relu","inputs":["a"],"output":"o"}]}"#;
        assert!(ComputeProgram::parse(oversized.as_bytes()).is_err());

        let arity = r#"{"inputs":["a"],"output":"o",
            "stages":[{"op":"add","inputs":["a"],"output":"o"}]}"#;
        assert!(ComputeProgram::parse(arity.as_bytes()).is_err());

        let unwritten = r#"{"inputs":["a"],"output":"z",
            "stages":[{"op":"neg","inputs":["a"],"output":"o"}]}"#;
        assert!(ComputeProgram::parse(unwritten.as_bytes()).is_err());
    }

    #[test]
    fn test_from_operations_chains_stages() {
        let program = ComputeProgram::from_operations(
            &names(&["add", "scale:0.5", "relu"]),
            &names(&["a", "b"]),
            "y",
        )
        .unwrap();
        assert_eq!(program.stages.len(), 3);
        assert_eq!(program.stages[0].inputs, names(&["a", "b"]));
        assert_eq!(program.stages[1].inputs, names(&["_t0"]));
        assert_eq!(program.stages[1].factor, Some(0.5));
        assert_eq!(program.stages[2].output, "y");
    }

    #[test]
    fn test_from_operations_errors() {
        assert!(ComputeProgram::from_operations(&names(&["add"]), &names(&["a"]), "y").is_err());
        assert!(ComputeProgram::from_operations(&names(&["scale"]), &names(&["a"]), "y").is_err());
        assert!(ComputeProgram::from_operations(&names(&["conv"]), &names(&["a"]), "y").is_err());
    }

    #[test]
    fn test_supports_all() {
        assert!(ComputeProgram::supports_all(&names(&["add", "scale:2"])));
        assert!(!ComputeProgram::supports_all(&names(&["add", "matmul"])));
        assert!(!ComputeProgram::supports_all(&[]));
    }
}
