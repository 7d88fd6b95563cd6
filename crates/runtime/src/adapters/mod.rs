// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The four execution backends.
//!
//! ```text
//!   Interpreter ── worker thread ── script
//!   Graph       ─┐
//!   Tensor      ─┼─ ManagedAdapter<B: Backend> ── spawn_blocking
//!   GpuCompute  ─┘
//! ```
//!
//! The interpreter drives its worker over the JSON protocol; the other three
//! are synchronous backends run through [`ManagedAdapter`](crate::adapter::ManagedAdapter).

mod exec;
pub mod gpu;
mod graph;
mod interpreter;
#[cfg(feature = "onnx")]
mod onnx;
mod tensor;

pub use exec::{PreparedGraph, PreparedLayers};
pub use gpu::{gpu_adapter, ComputeDevice, DeviceSelection, DeviceStats, GpuAdapter, GpuBackend, SoftwareDevice};
pub use graph::{graph_adapter, ExecutionProvider, GraphAdapter, GraphBackend, GraphSession};
pub use interpreter::InterpreterAdapter;
pub use tensor::{tensor_adapter, TensorAdapter, TensorBackend, TensorSession};
