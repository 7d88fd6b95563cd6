// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The uniform adapter contract.
//!
//! Every backend implements [`Adapter`]. Shared behaviour (lifecycle state,
//! initialization coalescing, call serialization, bundle and input
//! validation, output shaping) lives in [`AdapterCore`]; backends that run
//! synchronous code plug into [`ManagedAdapter`] through the [`Backend`]
//! trait.

mod base;
mod managed;
mod schema;

pub use base::AdapterCore;
pub use managed::{Backend, ManagedAdapter};
pub use schema::{normalize_input, shape_output};

use crate::adapters::gpu::DeviceSelection;
use crate::{CancellationToken, RuntimeError, RuntimeStatus};
use async_trait::async_trait;
use memory_manager::MemoryBudget;
use model_bundle::{Manifest, ModelBundle, RuntimeKind};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One backend behind the uniform contract.
///
/// Calls on one adapter are serialized in arrival order: a `load`, `predict`
/// or `unload` issued while another is in flight waits for it.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn kind(&self) -> RuntimeKind;

    /// Unique id of this adapter instance.
    fn id(&self) -> u64;

    /// Starts the backend. Concurrent calls share a single initialization.
    async fn initialize(&self) -> Result<(), RuntimeError>;

    /// Validates `bundle` and makes it resident in the backend.
    async fn load(&self, bundle: &ModelBundle) -> Result<ModelHandle, RuntimeError> {
        self.load_with_cancel(bundle, &CancellationToken::new()).await
    }

    /// Like [`load`](Self::load), returning `cancelled` as soon as `token`
    /// fires. The backend load still runs to completion; its result is
    /// released.
    async fn load_with_cancel(
        &self,
        bundle: &ModelBundle,
        token: &CancellationToken,
    ) -> Result<ModelHandle, RuntimeError>;

    async fn predict(&self, handle: &ModelHandle, input: Value) -> Result<Value, RuntimeError>;

    async fn unload(&self, handle: &ModelHandle) -> Result<(), RuntimeError>;

    /// Releases every backend resource. The adapter is unusable afterwards.
    async fn cleanup(&self) -> Result<(), RuntimeError>;

    fn status(&self) -> RuntimeStatus;

    fn last_error(&self) -> Option<RuntimeError>;
}

/// A loaded model, valid only with the adapter that created it.
#[derive(Debug, Clone)]
pub struct ModelHandle {
    id: u64,
    owner: u64,
    runtime: RuntimeKind,
    bundle: ModelBundle,
}

impl ModelHandle {
    pub(crate) fn new(owner: u64, runtime: RuntimeKind, bundle: ModelBundle) -> Self {
        Self {
            id: next_id(),
            owner,
            runtime,
            bundle,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Id of the adapter that owns this handle.
    pub fn owner(&self) -> u64 {
        self.owner
    }

    pub fn runtime(&self) -> RuntimeKind {
        self.runtime
    }

    pub fn model_name(&self) -> &str {
        self.bundle.name()
    }

    pub fn manifest(&self) -> &Manifest {
        self.bundle.manifest()
    }

    pub fn bundle(&self) -> &ModelBundle {
        &self.bundle
    }
}

/// A progress report from a long-running adapter operation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Progress {
    pub stage: String,
    /// Completion in `[0.0, 1.0]`.
    pub fraction: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Progress {
    pub fn new(stage: impl Into<String>, fraction: f32) -> Self {
        Self {
            stage: stage.into(),
            fraction: fraction.clamp(0.0, 1.0),
            message: None,
        }
    }
}

pub type ProgressCallback = Arc<dyn Fn(&Progress) + Send + Sync>;

/// Construction-time adapter options.
#[derive(Clone)]
pub struct AdapterOptions {
    /// Deadline for each worker request.
    pub request_timeout: Duration,
    /// Deadline for backend initialization.
    pub init_timeout: Duration,
    /// Budget for pooled tensor and device buffers.
    pub memory_budget: MemoryBudget,
    /// Default compute workgroup size.
    pub workgroup_size: u32,
    /// Device the GPU runtime opens.
    pub gpu_device: DeviceSelection,
    /// Packages made available to scripts at initialization.
    pub packages: Vec<String>,
    pub progress: Option<ProgressCallback>,
}

impl AdapterOptions {
    pub fn with_progress(mut self, callback: impl Fn(&Progress) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_memory_budget(mut self, budget: MemoryBudget) -> Self {
        self.memory_budget = budget;
        self
    }

    pub fn with_workgroup_size(mut self, size: u32) -> Self {
        self.workgroup_size = size;
        self
    }

    pub fn with_gpu_device(mut self, selection: DeviceSelection) -> Self {
        self.gpu_device = selection;
        self
    }
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            init_timeout: Duration::from_secs(60),
            memory_budget: MemoryBudget::from_mb(512),
            workgroup_size: 64,
            gpu_device: DeviceSelection::Auto,
            packages: Vec::new(),
            progress: None,
        }
    }
}

impl fmt::Debug for AdapterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterOptions")
            .field("request_timeout", &self.request_timeout)
            .field("init_timeout", &self.init_timeout)
            .field("memory_budget", &self.memory_budget)
            .field("workgroup_size", &self.workgroup_size)
            .field("gpu_device", &self.gpu_device)
            .field("packages", &self.packages)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Process-wide id source for adapters and handles.
pub(crate) fn next_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}
