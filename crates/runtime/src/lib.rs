// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # runtime
//!
//! Runs a model bundle on one of four interchangeable backends behind a
//! single [`Adapter`] contract.
//!
//! The runtime provides:
//! - [`Adapter`] and its shared lifecycle in [`AdapterCore`].
//! - Four backends in [`adapters`]: script interpreter, graph inference,
//!   tensor graph and GPU compute.
//! - The interpreter [`worker`] and its JSON protocol.
//! - Runtime selection ([`AdapterFactory`]) and deployment advice
//!   ([`AutoOptimizer`]).
//! - Multi-stage [`Pipeline`]s with caching and retry.
//!
//! # Adapter Lifecycle
//! ```text
//! Idle ─initialize─► Initializing ─► Ready ◄──► Loading / Executing
//!                                      │  ▲
//!                                      ▼  │ (recoverable)
//!                                      Error
//! any ─cleanup─► Terminated
//! ```
//!
//! # Concurrency
//! Host-side work is async on `tokio`. Synchronous backends run under
//! `spawn_blocking`; the interpreter has its own OS thread. Calls on one
//! adapter are queued in arrival order.

pub mod adapter;
pub mod adapters;
mod cancel;
mod config;
mod error;
mod factory;
mod metrics;
mod optimizer;
mod pipeline;
mod status;
pub mod worker;

pub use adapter::{Adapter, AdapterCore, AdapterOptions, ModelHandle, Progress, ProgressCallback};
pub use cancel::CancellationToken;
pub use config::RuntimeConfig;
pub use error::{ErrorKind, RuntimeError};
pub use factory::{AdapterFactory, AdapterSource};
pub use metrics::{PipelineMetadata, PipelineMetrics, StageTiming};
pub use optimizer::{
    compression_level, estimate_latency_ms, AutoOptimizer, OptimizationResult, OptimizeOptions,
    Quantization,
};
pub use pipeline::{
    CacheKey, ErrorHandling, Pipeline, PipelineConfig, PipelineOutput, PipelineStage, ResultCache,
    StageModel, StageRecord, Transform,
};
pub use status::RuntimeStatus;
