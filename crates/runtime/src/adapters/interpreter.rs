// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Script-interpreter runtime.
//!
//! Scripts run on a dedicated worker thread (see [`crate::worker`]); this
//! adapter is the host side. Each loaded bundle becomes a worker model
//! named `model-<handle id>`.

use crate::adapter::{
    normalize_input, shape_output, Adapter, AdapterCore, AdapterOptions, ModelHandle, Progress,
};
use crate::worker::protocol::{InitPayload, LoadPayload, PredictPayload, RequestType, UnloadPayload};
use crate::worker::WorkerClient;
use crate::{CancellationToken, RuntimeError, RuntimeStatus};
use async_trait::async_trait;
use model_bundle::{ModelBundle, RuntimeKind};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

type WorkerSlot = Arc<Mutex<Option<Arc<WorkerClient>>>>;

pub struct InterpreterAdapter {
    core: AdapterCore,
    worker: WorkerSlot,
    models: Mutex<HashMap<u64, String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn encode<T: serde::Serialize>(payload: &T) -> Result<Value, RuntimeError> {
    serde_json::to_value(payload)
        .map_err(|e| RuntimeError::execution(format!("cannot encode payload: {e}")))
}

impl InterpreterAdapter {
    pub fn new(options: AdapterOptions) -> Self {
        Self {
            core: AdapterCore::new(RuntimeKind::Interpreter, options),
            worker: Arc::new(Mutex::new(None)),
            models: Mutex::new(HashMap::new()),
        }
    }

    pub fn core(&self) -> &AdapterCore {
        &self.core
    }

    fn client(&self) -> Result<Arc<WorkerClient>, RuntimeError> {
        lock(&self.worker)
            .clone()
            .ok_or_else(|| RuntimeError::lifecycle("interpreter worker is not running"))
    }

    fn model_id(&self, handle: &ModelHandle) -> Result<String, RuntimeError> {
        lock(&self.models)
            .get(&handle.id())
            .cloned()
            .ok_or_else(|| RuntimeError::validation(format!("handle {} is not loaded", handle.id())))
    }

    /// Asks the worker for its initialization count, packages and loaded
    /// models.
    pub async fn worker_status(&self) -> Result<Value, RuntimeError> {
        self.core.ensure_initialized()?;
        let client = self.client()?;
        client
            .request(RequestType::Status, None, self.core.options().request_timeout, None)
            .await
    }

    /// Text files shipped to the worker; binary files are skipped.
    fn text_files(bundle: &ModelBundle) -> BTreeMap<String, String> {
        let mut files = BTreeMap::new();
        for (name, bytes) in bundle.files() {
            match std::str::from_utf8(bytes) {
                Ok(text) => {
                    files.insert(name.clone(), text.to_string());
                }
                Err(_) => tracing::debug!(file = %name, "skipping binary file for script worker"),
            }
        }
        files
    }
}

#[async_trait]
impl Adapter for InterpreterAdapter {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Interpreter
    }

    fn id(&self) -> u64 {
        self.core.id()
    }

    async fn initialize(&self) -> Result<(), RuntimeError> {
        let slot = Arc::clone(&self.worker);
        let faults = self.core.fault_sink();
        let timeout = self.core.options().request_timeout;
        let init = InitPayload {
            packages: self.core.options().packages.clone(),
            memory_limit_bytes: Some(self.core.options().memory_budget.as_bytes() as u64),
        };
        self.core
            .initialize_with(move || async move {
                let client = Arc::new(WorkerClient::spawn(faults)?);
                client
                    .request(RequestType::Init, Some(encode(&init)?), timeout, None)
                    .await
                    .map_err(|e| {
                        RuntimeError::initialization(format!("worker init failed: {}", e.message))
                    })?;
                *lock(&slot) = Some(client);
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
        self.core.validate_bundle(bundle).map_err(|e| self.core.fail(e))?;
        let code = bundle.code().ok_or_else(|| {
            self.core.fail(RuntimeError::loading(format!(
                "bundle '{}' has no script code",
                bundle.name()
            )))
        })?;
        let client = self.client()?;

        self.core.begin(RuntimeStatus::Loading);
        self.core.report(Progress::new("loading", 0.0));
        let handle = self.core.reserve_handle(bundle);
        let model_id = format!("model-{}", handle.id());
        let payload = encode(&LoadPayload {
            model_id: model_id.clone(),
            code: code.to_string(),
            manifest: bundle.manifest().clone(),
            files: Self::text_files(bundle),
        })
        .map_err(|e| self.core.fail(e))?;
        tracing::info!(bundle = %bundle.name(), model = %model_id, "loading script");

        let timeout = self.core.options().request_timeout;
        let progress = self.core.options().progress.clone();
        let task_client = Arc::clone(&client);
        let mut task = tokio::spawn(async move {
            task_client
                .request(RequestType::LoadModel, Some(payload), timeout, progress)
                .await
        });

        let outcome = tokio::select! {
            joined = &mut task => Some(joined),
            _ = token.cancelled() => None,
        };

        let Some(joined) = outcome else {
            let release = UnloadPayload {
                model_id: model_id.clone(),
            };
            let succeed = self.core.succeed_later();
            tokio::spawn(async move {
                if let Ok(Ok(_)) = task.await {
                    if let Ok(payload) = encode(&release) {
                        let _ = client
                            .request(RequestType::Unload, Some(payload), timeout, None)
                            .await;
                    }
                    tracing::debug!(model = %release.model_id, "released script from cancelled load");
                }
                succeed();
                drop(guard);
            });
            tracing::info!(bundle = %bundle.name(), "load cancelled");
            return Err(RuntimeError::cancelled(format!("load of '{}' cancelled", bundle.name())));
        };

        let loaded = match joined {
            Ok(result) => result,
            Err(e) => Err(RuntimeError::loading(format!("load task failed: {e}"))),
        };
        if let Err(e) = loaded {
            return Err(self.core.fail(e.context(format!("loading '{}'", bundle.name()))));
        }

        lock(&self.models).insert(handle.id(), model_id);
        self.core.register_handle(&handle);
        self.core.report(Progress::new("loading", 1.0));
        self.core.succeed();
        tracing::info!(bundle = %bundle.name(), handle = handle.id(), "script loaded");
        drop(guard);
        Ok(handle)
    }

    async fn predict(&self, handle: &ModelHandle, input: Value) -> Result<Value, RuntimeError> {
        self.core.ensure_initialized()?;
        self.core.check_handle(handle)?;
        // Scripts without declared inputs receive the caller's value as is.
        let specs = handle.bundle().inputs();
        let input = if specs.is_empty() {
            input
        } else {
            Value::Object(normalize_input(specs, input)?)
        };

        let _guard = self.core.lock_ops().await;
        self.core.ensure_initialized()?;
        self.core.check_handle(handle)?;
        let model_id = self.model_id(handle)?;
        let client = self.client()?;

        self.core.begin(RuntimeStatus::Executing);
        let payload = encode(&PredictPayload {
            model_id,
            input,
        })?;
        let raw = client
            .request(
                RequestType::Predict,
                Some(payload),
                self.core.options().request_timeout,
                None,
            )
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

        let model_id = lock(&self.models).remove(&handle.id());
        self.core.release_handle(handle);
        if let Some(model_id) = model_id {
            let client = self.client()?;
            client
                .request(
                    RequestType::Unload,
                    Some(encode(&UnloadPayload { model_id })?),
                    self.core.options().request_timeout,
                    None,
                )
                .await?;
        }
        tracing::debug!(handle = handle.id(), "script unloaded");
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), RuntimeError> {
        if self.core.status().is_terminal() {
            return Ok(());
        }
        let _guard = self.core.lock_ops().await;
        lock(&self.models).clear();
        if let Some(client) = lock(&self.worker).take() {
            client.shutdown();
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
