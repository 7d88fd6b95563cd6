// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor execution shared by the graph and tensor runtimes.
//!
//! Both runtimes run the same operator set; they differ only in where
//! tensors live. The executor is generic over [`Storage`], so the graph
//! runtime computes into plain vectors while the tensor runtime draws every
//! buffer from its [`BufferPool`](memory_manager::BufferPool).
//!
//! ```text
//! inputs ──▶ Slot ──▶ node 0 ──▶ node 1 ──▶ ... ──▶ outputs ──▶ JSON
//!                       │          │
//!                  release x   release h      (after each value's last reader)
//! ```

use crate::RuntimeError;
use memory_manager::PooledBuffer;
use model_bundle::formats::{Activation, GraphModel, GraphOp, Layer, LayersModel};
use model_bundle::formats::graph::Validated;
use model_bundle::IoSpec;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tensor_core::{
    binary, broadcast_shape, gelu, layer_norm, matmul, softmax, sum_all, to_json, unary, BinaryOp,
    DType, Shape, Tensor, TensorView, TensorViewMut, UnaryOp,
};

const DEFAULT_EPSILON: f32 = 1e-5;

/// Backing memory for one tensor.
pub trait Storage {
    fn data(&self) -> &[f32];
    fn data_mut(&mut self) -> &mut [f32];
}

impl Storage for Vec<f32> {
    fn data(&self) -> &[f32] {
        self
    }

    fn data_mut(&mut self) -> &mut [f32] {
        self
    }
}

impl Storage for PooledBuffer {
    fn data(&self) -> &[f32] {
        self.as_slice()
    }

    fn data_mut(&mut self) -> &mut [f32] {
        self.as_mut_slice()
    }
}

/// A live tensor: shape and dtype over some storage.
pub struct Slot<S> {
    pub shape: Shape,
    pub dtype: DType,
    pub storage: S,
}

impl<S: Storage> Slot<S> {
    pub fn view(&self) -> Result<TensorView<'_>, RuntimeError> {
        Ok(TensorView::from_parts(&self.shape, self.dtype, self.storage.data())?)
    }

    pub fn to_json(&self) -> Result<Value, RuntimeError> {
        Ok(to_json(&self.view()?))
    }
}

/// Allocates storage for `len` elements. Scalars and empty tensors still
/// get one element so every slot is backed.
fn alloc_slot<S, A>(alloc: &mut A, shape: Shape, dtype: DType) -> Result<Slot<S>, RuntimeError>
where
    A: FnMut(usize) -> Result<S, RuntimeError>,
{
    let storage = alloc(shape.num_elements().max(1))?;
    Ok(Slot {
        shape,
        dtype,
        storage,
    })
}

/// Converts one JSON input into a slot, honouring the declared dtype and
/// shape of its spec.
pub fn input_slot<S, A>(
    name: &str,
    value: &Value,
    spec: Option<&IoSpec>,
    alloc: &mut A,
) -> Result<Slot<S>, RuntimeError>
where
    S: Storage,
    A: FnMut(usize) -> Result<S, RuntimeError>,
{
    let dtype = spec.and_then(IoSpec::tensor_dtype).unwrap_or(DType::F32);
    let declared = spec.and_then(|s| s.shape.as_deref());
    let tensor = Tensor::from_json(value, dtype, declared).map_err(|e| {
        RuntimeError::validation(format!("input '{name}' is not a valid tensor: {e}"))
    })?;
    let mut slot = alloc_slot(alloc, tensor.shape().clone(), dtype)?;
    slot.storage.data_mut()[..tensor.len()].copy_from_slice(tensor.as_slice());
    Ok(slot)
}

/// Picks the value for a model input: by name, or the only value supplied.
pub(super) fn lookup<'a>(inputs: &'a Map<String, Value>, name: &str) -> Result<&'a Value, RuntimeError> {
    if let Some(value) = inputs.get(name) {
        return Ok(value);
    }
    match inputs.values().next() {
        Some(value) if inputs.len() == 1 => Ok(value),
        _ => Err(RuntimeError::validation(format!("missing model input '{name}'"))),
    }
}

pub(super) fn spec_for<'a>(specs: &'a [IoSpec], name: &str) -> Option<&'a IoSpec> {
    specs
        .iter()
        .find(|s| s.name == name)
        .or_else(|| if specs.len() == 1 { specs.first() } else { None })
}

// ── Kernels over slots ─────────────────────────────────────────

fn apply_unary<S, A>(op: UnaryOp, x: &TensorView<'_>, alloc: &mut A) -> Result<Slot<S>, RuntimeError>
where
    S: Storage,
    A: FnMut(usize) -> Result<S, RuntimeError>,
{
    let mut out = alloc_slot(alloc, x.shape().clone(), DType::F32)?;
    let mut view = TensorViewMut::from_parts(&out.shape, out.dtype, out.storage.data_mut())?;
    unary(op, x, &mut view)?;
    Ok(out)
}

fn apply_binary<S, A>(
    op: BinaryOp,
    lhs: &TensorView<'_>,
    rhs: &TensorView<'_>,
    alloc: &mut A,
) -> Result<Slot<S>, RuntimeError>
where
    S: Storage,
    A: FnMut(usize) -> Result<S, RuntimeError>,
{
    let shape = broadcast_shape(lhs.shape(), rhs.shape()).ok_or_else(|| {
        RuntimeError::execution(format!(
            "cannot broadcast {} with {}",
            lhs.shape(),
            rhs.shape()
        ))
    })?;
    let mut out = alloc_slot(alloc, shape, DType::F32)?;
    let mut view = TensorViewMut::from_parts(&out.shape, out.dtype, out.storage.data_mut())?;
    binary(op, lhs, rhs, &mut view)?;
    Ok(out)
}

/// Matrix product. A rank-1 left operand is treated as a single row and a
/// rank-1 right operand as a single column; the added axis is dropped from
/// the result.
fn apply_matmul<S, A>(
    lhs: &TensorView<'_>,
    rhs: &TensorView<'_>,
    alloc: &mut A,
) -> Result<Slot<S>, RuntimeError>
where
    S: Storage,
    A: FnMut(usize) -> Result<S, RuntimeError>,
{
    let lhs_shape = match lhs.shape().dims() {
        [k] => Shape::matrix(1, *k),
        _ => lhs.shape().clone(),
    };
    let rhs_shape = match rhs.shape().dims() {
        [k] => Shape::matrix(*k, 1),
        _ => rhs.shape().clone(),
    };
    let a = TensorView::from_parts(&lhs_shape, lhs.dtype(), lhs.as_slice())?;
    let b = TensorView::from_parts(&rhs_shape, rhs.dtype(), rhs.as_slice())?;
    if !lhs_shape.is_matmul_compatible(&rhs_shape) {
        return Err(RuntimeError::execution(format!(
            "matmul of {} and {} is undefined",
            lhs.shape(),
            rhs.shape()
        )));
    }

    let (m, n) = (lhs_shape.dims()[0], rhs_shape.dims()[1]);
    let full = Shape::matrix(m, n);
    let result = match (lhs.shape().rank(), rhs.shape().rank()) {
        (1, 1) => Shape::scalar(),
        (1, _) => Shape::vector(n),
        (_, 1) => Shape::vector(m),
        _ => full.clone(),
    };
    let mut out = alloc_slot(alloc, result, DType::F32)?;
    let mut view = TensorViewMut::from_parts(&full, DType::F32, out.storage.data_mut())?;
    matmul(&a, &b, &mut view)?;
    Ok(out)
}

fn apply_softmax<S, A>(x: &TensorView<'_>, alloc: &mut A) -> Result<Slot<S>, RuntimeError>
where
    S: Storage,
    A: FnMut(usize) -> Result<S, RuntimeError>,
{
    let mut out = alloc_slot(alloc, x.shape().clone(), DType::F32)?;
    let mut view = TensorViewMut::from_parts(&out.shape, out.dtype, out.storage.data_mut())?;
    softmax(x, &mut view)?;
    Ok(out)
}

fn apply_gelu<S, A>(x: &TensorView<'_>, alloc: &mut A) -> Result<Slot<S>, RuntimeError>
where
    S: Storage,
    A: FnMut(usize) -> Result<S, RuntimeError>,
{
    let mut out = alloc_slot(alloc, x.shape().clone(), DType::F32)?;
    let mut view = TensorViewMut::from_parts(&out.shape, out.dtype, out.storage.data_mut())?;
    gelu(x, &mut view)?;
    Ok(out)
}

fn apply_layer_norm<S, A>(
    x: &TensorView<'_>,
    gamma: Option<&[f32]>,
    beta: Option<&[f32]>,
    epsilon: f32,
    alloc: &mut A,
) -> Result<Slot<S>, RuntimeError>
where
    S: Storage,
    A: FnMut(usize) -> Result<S, RuntimeError>,
{
    let mut out = alloc_slot(alloc, x.shape().clone(), DType::F32)?;
    let mut view = TensorViewMut::from_parts(&out.shape, out.dtype, out.storage.data_mut())?;
    layer_norm(x, gamma, beta, epsilon, &mut view)?;
    Ok(out)
}

fn apply_sum<S, A>(x: &TensorView<'_>, alloc: &mut A) -> Result<Slot<S>, RuntimeError>
where
    S: Storage,
    A: FnMut(usize) -> Result<S, RuntimeError>,
{
    let mut out = alloc_slot(alloc, Shape::scalar(), DType::F32)?;
    out.storage.data_mut()[0] = sum_all(x);
    Ok(out)
}

fn apply_copy<S, A>(x: &TensorView<'_>, alloc: &mut A) -> Result<Slot<S>, RuntimeError>
where
    S: Storage,
    A: FnMut(usize) -> Result<S, RuntimeError>,
{
    let mut out = alloc_slot(alloc, x.shape().clone(), x.dtype())?;
    out.storage.data_mut()[..x.as_slice().len()].copy_from_slice(x.as_slice());
    Ok(out)
}

fn apply_activation<S, A>(
    activation: Activation,
    x: &TensorView<'_>,
    alloc: &mut A,
) -> Result<Slot<S>, RuntimeError>
where
    S: Storage,
    A: FnMut(usize) -> Result<S, RuntimeError>,
{
    match activation {
        Activation::Linear => apply_copy(x, alloc),
        Activation::Relu => apply_unary(UnaryOp::Relu, x, alloc),
        Activation::Sigmoid => apply_unary(UnaryOp::Sigmoid, x, alloc),
        Activation::Tanh => apply_unary(UnaryOp::Tanh, x, alloc),
        Activation::Gelu => apply_gelu(x, alloc),
    }
}

// ── Operator graphs ────────────────────────────────────────────

/// A validated graph with its constants materialized and its release
/// schedule computed.
pub struct PreparedGraph {
    graph: GraphModel<Validated>,
    consts: HashMap<String, Tensor>,
    /// Values to drop after each node runs.
    releases: Vec<Vec<String>>,
}

impl PreparedGraph {
    pub fn new(graph: GraphModel<Validated>) -> Result<Self, RuntimeError> {
        let mut consts = HashMap::with_capacity(graph.initializers.len());
        for (name, init) in &graph.initializers {
            let tensor = Tensor::from_vec(init.shape(), init.data.clone())?;
            consts.insert(name.clone(), tensor);
        }

        let mut releases = vec![Vec::new(); graph.nodes.len()];
        let last_uses = graph.last_uses();
        for (name, &index) in &last_uses {
            if index != usize::MAX && !consts.contains_key(*name) {
                releases[index].push(name.to_string());
            }
        }
        // Values nobody reads are dropped as soon as they are produced.
        for (index, node) in graph.nodes.iter().enumerate() {
            if !last_uses.contains_key(node.output.as_str()) {
                releases[index].push(node.output.clone());
            }
        }

        Ok(Self {
            graph,
            consts,
            releases,
        })
    }

    pub fn graph(&self) -> &GraphModel<Validated> {
        &self.graph
    }

    /// Values released after node `index`.
    pub fn releases_after(&self, index: usize) -> &[String] {
        self.releases.get(index).map_or(&[], Vec::as_slice)
    }

    /// Runs every node in order.
    ///
    /// Returns the single graph output as nested arrays, or an object keyed
    /// by output name when the graph has several. Every slot is dropped
    /// before returning.
    pub fn run<S, A>(
        &self,
        inputs: &Map<String, Value>,
        specs: &[IoSpec],
        alloc: &mut A,
    ) -> Result<Value, RuntimeError>
    where
        S: Storage,
        A: FnMut(usize) -> Result<S, RuntimeError>,
    {
        let mut live: HashMap<String, Slot<S>> = HashMap::new();
        for name in &self.graph.inputs {
            let value = lookup(inputs, name)?;
            let slot = input_slot(name, value, spec_for(specs, name), alloc)?;
            live.insert(name.clone(), slot);
        }

        for (index, node) in self.graph.nodes.iter().enumerate() {
            let out = {
                let mut args = Vec::with_capacity(node.inputs.len());
                for name in &node.inputs {
                    args.push(self.operand(&live, name)?);
                }
                self.eval_node(node.op, &node.attrs, &args, alloc)
                    .map_err(|e| e.context(format!("node {index} ({:?} -> {})", node.op, node.output)))?
            };
            live.insert(node.output.clone(), out);
            for name in &self.releases[index] {
                live.remove(name);
            }
            tracing::trace!(node = index, live = live.len(), "graph node done");
        }

        let result = if let [only] = self.graph.outputs.as_slice() {
            self.output(&live, only)?
        } else {
            let mut object = Map::new();
            for name in &self.graph.outputs {
                object.insert(name.clone(), self.output(&live, name)?);
            }
            Value::Object(object)
        };
        drop(live);
        Ok(result)
    }

    fn operand<'a, S: Storage>(
        &'a self,
        live: &'a HashMap<String, Slot<S>>,
        name: &str,
    ) -> Result<TensorView<'a>, RuntimeError> {
        if let Some(slot) = live.get(name) {
            return slot.view();
        }
        match self.consts.get(name) {
            Some(tensor) => Ok(tensor.view()),
            None => Err(RuntimeError::execution(format!("value '{name}' is not live"))),
        }
    }

    fn output<S: Storage>(
        &self,
        live: &HashMap<String, Slot<S>>,
        name: &str,
    ) -> Result<Value, RuntimeError> {
        Ok(to_json(&self.operand(live, name)?))
    }

    fn eval_node<S, A>(
        &self,
        op: GraphOp,
        attrs: &model_bundle::formats::NodeAttrs,
        args: &[TensorView<'_>],
        alloc: &mut A,
    ) -> Result<Slot<S>, RuntimeError>
    where
        S: Storage,
        A: FnMut(usize) -> Result<S, RuntimeError>,
    {
        let x = &args[0];
        match op {
            GraphOp::Matmul => apply_matmul(x, &args[1], alloc),
            GraphOp::Add => apply_binary(BinaryOp::Add, x, &args[1], alloc),
            GraphOp::Sub => apply_binary(BinaryOp::Sub, x, &args[1], alloc),
            GraphOp::Mul => apply_binary(BinaryOp::Mul, x, &args[1], alloc),
            GraphOp::Relu => apply_unary(UnaryOp::Relu, x, alloc),
            GraphOp::Sigmoid => apply_unary(UnaryOp::Sigmoid, x, alloc),
            GraphOp::Gelu => apply_gelu(x, alloc),
            GraphOp::Softmax => apply_softmax(x, alloc),
            GraphOp::LayerNorm => apply_layer_norm(
                x,
                args.get(1).map(TensorView::as_slice),
                args.get(2).map(TensorView::as_slice),
                attrs.epsilon.unwrap_or(DEFAULT_EPSILON),
                alloc,
            ),
            GraphOp::Scale => apply_unary(UnaryOp::Scale(attrs.factor.unwrap_or(1.0)), x, alloc),
            GraphOp::Sum => apply_sum(x, alloc),
            GraphOp::Identity => apply_copy(x, alloc),
        }
    }
}

// ── Layered models ─────────────────────────────────────────────

enum PreparedLayer {
    Dense {
        weights: Tensor,
        bias: Option<Tensor>,
        activation: Option<Activation>,
    },
    Activation(Activation),
    Softmax,
    LayerNorm(f32),
}

/// A sequential model with dense weights packed into row-major matrices.
pub struct PreparedLayers {
    input: String,
    layers: Vec<PreparedLayer>,
    parameters: usize,
}

impl PreparedLayers {
    pub fn new(model: &LayersModel) -> Result<Self, RuntimeError> {
        let mut layers = Vec::with_capacity(model.layers.len());
        for layer in &model.layers {
            layers.push(match layer {
                Layer::Dense {
                    units,
                    weights,
                    bias,
                    activation,
                } => {
                    let flat: Vec<f32> = weights.iter().flatten().copied().collect();
                    PreparedLayer::Dense {
                        weights: Tensor::from_vec(Shape::matrix(weights.len(), *units), flat)?,
                        bias: bias
                            .as_ref()
                            .map(|b| Tensor::from_vec(Shape::vector(b.len()), b.clone()))
                            .transpose()?,
                        activation: *activation,
                    }
                }
                Layer::Activation { activation } => PreparedLayer::Activation(*activation),
                Layer::Softmax => PreparedLayer::Softmax,
                Layer::LayerNorm { epsilon } => PreparedLayer::LayerNorm(*epsilon),
            });
        }
        Ok(Self {
            input: model.input.clone(),
            layers,
            parameters: model.parameter_count(),
        })
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters
    }

    /// Runs the layers in order, keeping at most the current activation and
    /// its successor alive.
    pub fn run<S, A>(
        &self,
        inputs: &Map<String, Value>,
        specs: &[IoSpec],
        alloc: &mut A,
    ) -> Result<Value, RuntimeError>
    where
        S: Storage,
        A: FnMut(usize) -> Result<S, RuntimeError>,
    {
        let value = lookup(inputs, &self.input)?;
        let mut current: Slot<S> = input_slot(&self.input, value, spec_for(specs, &self.input), alloc)?;

        for (index, layer) in self.layers.iter().enumerate() {
            let next = self
                .eval_layer(layer, &current.view()?, alloc)
                .map_err(|e| e.context(format!("layer {index}")))?;
            current = next;
        }
        current.to_json()
    }

    fn eval_layer<S, A>(
        &self,
        layer: &PreparedLayer,
        x: &TensorView<'_>,
        alloc: &mut A,
    ) -> Result<Slot<S>, RuntimeError>
    where
        S: Storage,
        A: FnMut(usize) -> Result<S, RuntimeError>,
    {
        match layer {
            PreparedLayer::Dense {
                weights,
                bias,
                activation,
            } => {
                let mut out = apply_matmul(x, &weights.view(), alloc)?;
                if let Some(bias) = bias {
                    let biased = apply_binary(BinaryOp::Add, &out.view()?, &bias.view(), alloc)?;
                    out = biased;
                }
                match activation {
                    Some(act) if *act != Activation::Linear => {
                        apply_activation(*act, &out.view()?, alloc)
                    }
                    _ => Ok(out),
                }
            }
            PreparedLayer::Activation(act) => apply_activation(*act, x, alloc),
            PreparedLayer::Softmax => apply_softmax(x, alloc),
            PreparedLayer::LayerNorm(epsilon) => apply_layer_norm(x, None, None, *epsilon, alloc),
        }
    }
}
