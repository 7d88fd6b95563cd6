// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! WGSL generation for the fixed kernel set.
//!
//! One shader per program stage. Operands bind in stage order at
//! `@binding(0..n)`, the output at `@binding(n)`. Every kernel checks the
//! invocation index against the output length before touching memory.

use model_bundle::formats::{ComputeOp, ComputeStage};

/// The bounds check every generated kernel carries.
pub const BOUNDS_GUARD: &str = "if (i >= arrayLength(&out)) { return; }";

const OPERANDS: [&str; 2] = ["a", "b"];

/// A generated compute shader plus the kernel it encodes.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderModule {
    pub label: String,
    pub source: String,
    pub op: ComputeOp,
    pub factor: Option<f32>,
    pub workgroup_size: u32,
}

impl ShaderModule {
    /// Number of bound buffers, output included.
    pub fn bindings(&self) -> usize {
        self.op.arity() + 1
    }
}

/// Generates the shader for one stage.
pub fn generate(index: usize, stage: &ComputeStage, workgroup_size: u32) -> ShaderModule {
    let arity = stage.op.arity();
    let mut source = String::new();
    for (binding, name) in OPERANDS.iter().take(arity).enumerate() {
        source.push_str(&format!(
            "@group(0) @binding({binding}) var<storage, read> {name}: array<f32>;\n"
        ));
    }
    source.push_str(&format!(
        "@group(0) @binding({arity}) var<storage, read_write> out: array<f32>;\n\n"
    ));
    source.push_str(&format!("@compute @workgroup_size({workgroup_size})\n"));
    source.push_str("fn main(@builtin(global_invocation_id) gid: vec3<u32>) {\n");
    source.push_str("    let i = gid.x;\n");
    source.push_str(&format!("    {BOUNDS_GUARD}\n"));
    source.push_str(&format!("    out[i] = {};\n", expression(stage.op, stage.factor)));
    source.push_str("}\n");

    ShaderModule {
        label: format!("stage{index}_{}", stage.op.as_str()),
        source,
        op: stage.op,
        factor: stage.factor,
        workgroup_size,
    }
}

fn expression(op: ComputeOp, factor: Option<f32>) -> String {
    match op {
        ComputeOp::Add => "a[i] + b[i]".into(),
        ComputeOp::Sub => "a[i] - b[i]".into(),
        ComputeOp::Mul => "a[i] * b[i]".into(),
        ComputeOp::Div => "a[i] / b[i]".into(),
        ComputeOp::Relu => "max(a[i], 0.0)".into(),
        ComputeOp::Sigmoid => "1.0 / (1.0 + exp(-a[i]))".into(),
        // `{:?}` always renders a decimal point, which WGSL needs for f32.
        ComputeOp::Scale => format!("a[i] * {:?}", factor.unwrap_or(1.0)),
        ComputeOp::Neg => "-a[i]".into(),
    }
}

/// Evaluates one lane of a kernel. `b` is ignored by unary kernels.
pub fn eval_lane(op: ComputeOp, factor: Option<f32>, a: f32, b: f32) -> f32 {
    match op {
        ComputeOp::Add => a + b,
        ComputeOp::Sub => a - b,
        ComputeOp::Mul => a * b,
        ComputeOp::Div => a / b,
        ComputeOp::Relu => a.max(0.0),
        ComputeOp::Sigmoid => 1.0 / (1.0 + (-a).exp()),
        ComputeOp::Scale => a * factor.unwrap_or(1.0),
        ComputeOp::Neg => -a,
    }
}
