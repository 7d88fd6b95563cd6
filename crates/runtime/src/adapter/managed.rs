// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Adapters over synchronous, in-process backends.
//!
//! A [`Backend`] owns the compute: session setup, model preparation and
//! execution. [`ManagedAdapter`] wraps it with the shared lifecycle from
//! [`AdapterCore`] and runs every backend call on the blocking pool, so a
//! long matmul never stalls the async executor.

use super::{normalize_input, shape_output, Adapter, AdapterCore, AdapterOptions, ModelHandle, Progress};
use crate::{CancellationToken, RuntimeError, RuntimeStatus};
use async_trait::async_trait;
use model_bundle::{ModelBundle, RuntimeKind};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;

/// The synchronous part of a runtime.
pub trait Backend: Send + Sync + 'static {
    /// Per-adapter state created once by [`Backend::initialize`].
    type Session: Send + Sync + 'static;
    /// A model prepared for execution.
    type Model: Send + Sync + 'static;

    fn kind(&self) -> RuntimeKind;

    fn initialize(&self) -> Result<Self::Session, RuntimeError>;

    /// Parses and prepares a verified bundle.
    fn load(&self, session: &Self::Session, bundle: &ModelBundle) -> Result<Self::Model, RuntimeError>;

    /// Runs one inference over normalized inputs. The result is shaped
    /// against the declared outputs by the caller.
    fn predict(
        &self,
        session: &Self::Session,
        model: &Self::Model,
        inputs: &Map<String, Value>,
    ) -> Result<Value, RuntimeError>;

    fn unload(&self, _session: &Self::Session, _model: &Self::Model) {}
}

/// A [`Backend`] behind the [`Adapter`] contract.
pub struct ManagedAdapter<B: Backend> {
    core: AdapterCore,
    backend: Arc<B>,
    session: Arc<RwLock<Option<Arc<B::Session>>>>,
    models: Mutex<HashMap<u64, Arc<B::Model>>>,
}

impl<B: Backend> ManagedAdapter<B> {
    pub fn new(backend: B, options: AdapterOptions) -> Self {
        Self {
            core: AdapterCore::new(backend.kind(), options),
            backend: Arc::new(backend),
            session: Arc::new(RwLock::new(None)),
            models: Mutex::new(HashMap::new()),
        }
    }

    pub fn core(&self) -> &AdapterCore {
        &self.core
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The live session, once initialized.
    pub fn session(&self) -> Option<Arc<B::Session>> {
        self.session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn require_session(&self) -> Result<Arc<B::Session>, RuntimeError> {
        self.session().ok_or_else(|| {
            RuntimeError::lifecycle(format!("{} adapter is not initialized", self.core.kind()))
        })
    }

    fn models(&self) -> MutexGuard<'_, HashMap<u64, Arc<B::Model>>> {
        self.models.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn model(&self, handle: &ModelHandle) -> Result<Arc<B::Model>, RuntimeError> {
        self.models().get(&handle.id()).cloned().ok_or_else(|| {
            RuntimeError::validation(format!("handle {} is not loaded", handle.id()))
        })
    }
}

/// Awaits a blocking task, mapping a panic or cancellation onto `execution`.
async fn join<T>(task: JoinHandle<Result<T, RuntimeError>>) -> Result<T, RuntimeError> {
    match task.await {
        Ok(result) => result,
        Err(e) => Err(RuntimeError::execution(format!("backend task failed: {e}"))),
    }
}

#[async_trait]
impl<B: Backend> Adapter for ManagedAdapter<B> {
    fn kind(&self) -> RuntimeKind {
        self.core.kind()
    }

    fn id(&self) -> u64 {
        self.core.id()
    }

    async fn initialize(&self) -> Result<(), RuntimeError> {
        let backend = Arc::clone(&self.backend);
        let slot = Arc::clone(&self.session);
        self.core
            .initialize_with(move || async move {
                let session = join(tokio::task::spawn_blocking(move || backend.initialize())).await?;
                *slot.write().unwrap_or_else(|poisoned| poisoned.into_inner()) =
                    Some(Arc::new(session));
                Ok(())
            })
            .await
    }

    async fn load_with_cancel(
        &self,
        bundle: &ModelBundle,
        token: &CancellationToken,
    ) -> Result<ModelHandle, RuntimeError> {
        self.core.ensure_initialized()?;
        let guard = self.core.lock_ops().await;
        self.core.ensure_initialized()?;
        if token.is_cancelled() {
            return Err(RuntimeError::cancelled(format!("load of '{}' cancelled", bundle.name())));
        }
        self.core
            .validate_bundle(bundle)
            .map_err(|e| self.core.fail(e))?;

        let session = self.require_session()?;
        self.core.begin(RuntimeStatus::Loading);
        self.core.report(Progress::new("loading", 0.0));
        tracing::info!(runtime = %self.core.kind(), bundle = %bundle.name(), "loading model");

        let backend = Arc::clone(&self.backend);
        let owned = bundle.clone();
        let task_session = Arc::clone(&session);
        let mut task =
            tokio::task::spawn_blocking(move || backend.load(&task_session, &owned));

        let outcome = tokio::select! {
            joined = &mut task => Some(joined),
            _ = token.cancelled() => None,
        };

        let Some(joined) = outcome else {
            // The backend cannot be interrupted; release its result once it
            // lands and keep the op lock until then.
            let backend = Arc::clone(&self.backend);
            let name = bundle.name().to_string();
            let succeed = self.core.succeed_later();
            tokio::spawn(async move {
                if let Ok(Ok(model)) = task.await {
                    backend.unload(&session, &model);
                    tracing::debug!(bundle = %name, "released model from cancelled load");
                }
                succeed();
                drop(guard);
            });
            tracing::info!(bundle = %bundle.name(), "load cancelled");
            return Err(RuntimeError::cancelled(format!("load of '{}' cancelled", bundle.name())));
        };

        let model = match joined {
            Ok(Ok(model)) => model,
            Ok(Err(e)) => return Err(self.core.fail(e.context(format!("loading '{}'", bundle.name())))),
            Err(e) => {
                return Err(self
                    .core
                    .fail(RuntimeError::loading(format!("backend task failed: {e}"))))
            }
        };

        let handle = self.core.new_handle(bundle);
        self.models().insert(handle.id(), Arc::new(model));
        self.core.report(Progress::new("loading", 1.0));
        self.core.succeed();
        tracing::info!(
            runtime = %self.core.kind(),
            bundle = %bundle.name(),
            handle = handle.id(),
            "model loaded"
        );
        drop(guard);
        Ok(handle)
    }

    async fn predict(&self, handle: &ModelHandle, input: Value) -> Result<Value, RuntimeError> {
        self.core.ensure_initialized()?;
        self.core.check_handle(handle)?;
        let inputs = normalize_input(handle.bundle().inputs(), input)?;

        let _guard = self.core.lock_ops().await;
        self.core.ensure_initialized()?;
        self.core.check_handle(handle)?;
        let session = self.require_session()?;
        let model = self.model(handle)?;

        self.core.begin(RuntimeStatus::Executing);
        let backend = Arc::clone(&self.backend);
        let raw = join(tokio::task::spawn_blocking(move || {
            backend.predict(&session, &model, &inputs)
        }))
        .await
        .map_err(|e| self.core.fail(e))?;

        let shaped = shape_output(handle.bundle().outputs(), raw).map_err(|e| self.core.fail(e))?;
        self.core.succeed();
        Ok(shaped)
    }

    async fn unload(&self, handle: &ModelHandle) -> Result<(), RuntimeError> {
        self.core.ensure_initialized()?;
        self.core.check_handle(handle)?;
        let _guard = self.core.lock_ops().await;

        let model = self.models().remove(&handle.id());
        self.core.release_handle(handle);
        if let (Some(model), Some(session)) = (model, self.session()) {
            self.backend.unload(&session, &model);
        }
        tracing::debug!(runtime = %self.core.kind(), handle = handle.id(), "model unloaded");
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), RuntimeError> {
        if self.core.status().is_terminal() {
            return Ok(());
        }
        let _guard = self.core.lock_ops().await;
        let models: Vec<_> = self.models().drain().map(|(_, model)| model).collect();
        let session = self
            .session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(session) = session {
            for model in &models {
                self.backend.unload(&session, model);
            }
        }
        self.core.terminate();
        Ok(())
    }

    fn status(&self) -> RuntimeStatus {
        self.core.status()
    }

    fn last_error(&self) -> Option<RuntimeError> {
        self.core.last_error()
    }
}
