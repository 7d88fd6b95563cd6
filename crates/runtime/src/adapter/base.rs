// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! State and checks shared by every adapter.

use super::{AdapterOptions, ModelHandle, Progress};
use crate::{RuntimeError, RuntimeStatus};
use futures::future::{BoxFuture, FutureExt, Shared};
use model_bundle::{ModelBundle, RuntimeKind};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;

type InitFuture = Shared<BoxFuture<'static, Result<(), RuntimeError>>>;

/// Lifecycle state, call serialization and validation for one adapter
/// instance.
///
/// Adapters embed one `AdapterCore` and route every public call through it:
///
/// ```text
/// initialize ─▶ initialize_with()   coalesced, at most one backend init in flight
/// load       ─▶ ensure_initialized() ─▶ lock_ops() ─▶ validate_bundle() ─▶ backend
/// predict    ─▶ ensure_initialized() ─▶ check_handle() ─▶ lock_ops() ─▶ backend
/// cleanup    ─▶ lock_ops() ─▶ terminate()
/// ```
pub struct AdapterCore {
    id: u64,
    kind: RuntimeKind,
    options: AdapterOptions,
    state: Arc<StateCell>,
    init: Mutex<Option<InitFuture>>,
    ops: Arc<tokio::sync::Mutex<()>>,
    handles: Mutex<HashSet<u64>>,
}

struct StateCell {
    kind: RuntimeKind,
    inner: Mutex<CoreState>,
    initialized: AtomicBool,
}

struct CoreState {
    status: RuntimeStatus,
    last_error: Option<RuntimeError>,
}

impl StateCell {
    fn lock(&self) -> MutexGuard<'_, CoreState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Terminated is sticky: late transitions from background work are ignored.
    fn set_status(&self, status: RuntimeStatus) {
        let mut state = self.lock();
        if state.status != RuntimeStatus::Terminated {
            state.status = status;
        }
    }

    fn record_error(&self, err: &RuntimeError) {
        let mut state = self.lock();
        if state.status != RuntimeStatus::Terminated {
            state.status = RuntimeStatus::Error;
        }
        state.last_error = Some(err.clone());
        tracing::warn!(runtime = %self.kind, kind = %err.kind, "{}", err.message);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AdapterCore {
    pub fn new(kind: RuntimeKind, options: AdapterOptions) -> Self {
        let id = super::next_id();
        tracing::debug!(runtime = %kind, adapter = id, "adapter created");
        Self {
            id,
            kind,
            options,
            state: Arc::new(StateCell {
                kind,
                inner: Mutex::new(CoreState {
                    status: RuntimeStatus::Idle,
                    last_error: None,
                }),
                initialized: AtomicBool::new(false),
            }),
            init: Mutex::new(None),
            ops: Arc::new(tokio::sync::Mutex::new(())),
            handles: Mutex::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> RuntimeKind {
        self.kind
    }

    pub fn options(&self) -> &AdapterOptions {
        &self.options
    }

    pub fn status(&self) -> RuntimeStatus {
        self.state.lock().status
    }

    pub fn last_error(&self) -> Option<RuntimeError> {
        self.state.lock().last_error.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.initialized.load(Ordering::SeqCst)
    }

    /// Fails with `lifecycle` once the adapter has been cleaned up.
    pub fn ensure_live(&self) -> Result<(), RuntimeError> {
        if self.status().is_terminal() {
            return Err(RuntimeError::lifecycle(format!(
                "{} adapter has been cleaned up",
                self.kind
            )));
        }
        Ok(())
    }

    /// Fails with `lifecycle` unless the adapter is live and initialized.
    pub fn ensure_initialized(&self) -> Result<(), RuntimeError> {
        self.ensure_live()?;
        if !self.is_initialized() {
            return Err(RuntimeError::lifecycle(format!(
                "{} adapter is not initialized",
                self.kind
            )));
        }
        Ok(())
    }

    /// Runs backend initialization at most once at a time.
    ///
    /// A call arriving while initialization is in flight awaits the same
    /// attempt and observes the same outcome. After success further calls
    /// return immediately; after failure the next call starts a new attempt.
    pub async fn initialize_with<F, Fut>(&self, init: F) -> Result<(), RuntimeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), RuntimeError>> + Send + 'static,
    {
        self.ensure_live()?;
        let attempt = {
            let mut slot = lock(&self.init);
            match slot.as_ref() {
                Some(existing) if !matches!(existing.peek(), Some(Err(_))) => existing.clone(),
                _ => {
                    let state = Arc::clone(&self.state);
                    let timeout = self.options.init_timeout;
                    let kind = self.kind;
                    state.set_status(RuntimeStatus::Initializing);
                    tracing::info!(runtime = %kind, "initializing adapter");
                    let backend_init = init();
                    let attempt = async move {
                        let result = match tokio::time::timeout(timeout, backend_init).await {
                            Ok(result) => result,
                            Err(_) => Err(RuntimeError::timeout(format!(
                                "{kind} initialization exceeded {}ms",
                                timeout.as_millis()
                            ))),
                        };
                        match &result {
                            Ok(()) => {
                                state.initialized.store(true, Ordering::SeqCst);
                                state.set_status(RuntimeStatus::Ready);
                                tracing::info!(runtime = %kind, "adapter ready");
                            }
                            Err(err) => state.record_error(err),
                        }
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some(attempt.clone());
                    attempt
                }
            }
        };
        attempt.await
    }

    /// Waits for exclusive use of the backend. Waiters are served in order.
    pub async fn lock_ops(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.ops).lock_owned().await
    }

    pub fn begin(&self, status: RuntimeStatus) {
        self.state.set_status(status);
    }

    /// Marks the current operation as finished.
    pub fn succeed(&self) {
        self.state.set_status(RuntimeStatus::Ready);
    }

    /// Marks the current operation finished from a detached task.
    pub fn succeed_later(&self) -> impl FnOnce() + Send + 'static {
        let state = Arc::clone(&self.state);
        move || state.set_status(RuntimeStatus::Ready)
    }

    /// Records `err` as the last error, moves to `Error` and hands it back.
    pub fn fail(&self, err: RuntimeError) -> RuntimeError {
        self.state.record_error(&err);
        err
    }

    /// A sink for errors raised outside any call, such as worker faults.
    pub fn fault_sink(&self) -> Arc<dyn Fn(RuntimeError) + Send + Sync> {
        let state = Arc::clone(&self.state);
        Arc::new(move |err: RuntimeError| state.record_error(&err))
    }

    /// Moves to `Terminated` and forgets every handle.
    pub fn terminate(&self) {
        self.state.set_status(RuntimeStatus::Terminated);
        self.state.initialized.store(false, Ordering::SeqCst);
        *lock(&self.init) = None;
        lock(&self.handles).clear();
        tracing::info!(runtime = %self.kind, adapter = self.id, "adapter terminated");
    }

    /// Manifest completeness, file records, payload digest and declared
    /// runtime. Failures are `validation` errors.
    pub fn validate_bundle(&self, bundle: &ModelBundle) -> Result<(), RuntimeError> {
        bundle.verify().map_err(|e| {
            RuntimeError::validation(format!("bundle '{}' rejected: {e}", bundle.name()))
        })?;
        match bundle.declared_runtime() {
            Ok(Some(declared)) if declared != self.kind => Err(RuntimeError::validation(format!(
                "bundle '{}' declares runtime '{declared}', adapter runs '{}'",
                bundle.name(),
                self.kind
            ))),
            Ok(_) => Ok(()),
            Err(e) => Err(RuntimeError::validation(e.to_string())),
        }
    }

    pub fn new_handle(&self, bundle: &ModelBundle) -> ModelHandle {
        let handle = self.reserve_handle(bundle);
        self.register_handle(&handle);
        handle
    }

    /// A handle that [`check_handle`](Self::check_handle) rejects until it
    /// is registered.
    pub fn reserve_handle(&self, bundle: &ModelBundle) -> ModelHandle {
        ModelHandle::new(self.id, self.kind, bundle.clone())
    }

    pub fn register_handle(&self, handle: &ModelHandle) {
        lock(&self.handles).insert(handle.id());
    }

    /// Rejects handles created by another adapter or already unloaded.
    pub fn check_handle(&self, handle: &ModelHandle) -> Result<(), RuntimeError> {
        if handle.owner() != self.id {
            return Err(RuntimeError::validation(format!(
                "handle {} belongs to adapter {}, not {}",
                handle.id(),
                handle.owner(),
                self.id
            )));
        }
        if !lock(&self.handles).contains(&handle.id()) {
            return Err(RuntimeError::validation(format!(
                "handle {} ('{}') is not loaded",
                handle.id(),
                handle.model_name()
            )));
        }
        Ok(())
    }

    pub fn release_handle(&self, handle: &ModelHandle) {
        lock(&self.handles).remove(&handle.id());
    }

    pub fn loaded_handles(&self) -> usize {
        lock(&self.handles).len()
    }

    /// Forwards a progress report to the configured callback.
    pub fn report(&self, progress: Progress) {
        tracing::trace!(runtime = %self.kind, stage = %progress.stage, fraction = progress.fraction, "progress");
        if let Some(callback) = &self.options.progress {
            callback(&progress);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use model_bundle::{BundleBuilder, IoSpec};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn bundle(runtime: &str) -> ModelBundle {
        BundleBuilder::new("m", "1.0.0", runtime)
            .code("model.rt", "fn predict(input) = input;")
            .input(IoSpec::new("x", "float32"))
            .build()
    }

    #[tokio::test]
    async fn test_initialize_coalesces() {
        let core = Arc::new(AdapterCore::new(RuntimeKind::Interpreter, AdapterOptions::default()));
        let runs = Arc::new(AtomicUsize::new(0));

        let make = |runs: Arc<AtomicUsize>| {
            move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(())
            }
        };
        let (a, b) = tokio::join!(
            core.initialize_with(make(runs.clone())),
            core.initialize_with(make(runs.clone()))
        );
        a.unwrap();
        b.unwrap();
        core.initialize_with(make(runs.clone())).await.unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(core.status(), RuntimeStatus::Ready);
    }

    #[tokio::test]
    async fn test_failed_initialize_can_retry() {
        let core = AdapterCore::new(RuntimeKind::Graph, AdapterOptions::default());
        let err = core
            .initialize_with(|| async { Err(RuntimeError::initialization("no device")) })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Initialization);
        assert_eq!(core.status(), RuntimeStatus::Error);
        assert!(core.ensure_initialized().is_err());

        core.initialize_with(|| async { Ok(()) }).await.unwrap();
        assert!(core.ensure_initialized().is_ok());
    }

    #[test]
    fn test_runtime_mismatch_rejected() {
        let core = AdapterCore::new(RuntimeKind::Graph, AdapterOptions::default());
        let err = core.validate_bundle(&bundle("interpreter")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(core.validate_bundle(&bundle("auto")).is_ok());
    }

    #[test]
    fn test_foreign_handle_rejected() {
        let a = AdapterCore::new(RuntimeKind::Interpreter, AdapterOptions::default());
        let b = AdapterCore::new(RuntimeKind::Interpreter, AdapterOptions::default());
        let handle = a.new_handle(&bundle("interpreter"));
        assert!(a.check_handle(&handle).is_ok());
        assert!(b.check_handle(&handle).is_err());

        a.release_handle(&handle);
        assert!(a.check_handle(&handle).is_err());
    }

    #[test]
    fn test_reserved_handle_rejected_until_registered() {
        let core = AdapterCore::new(RuntimeKind::Interpreter, AdapterOptions::default());
        let handle = core.reserve_handle(&bundle("interpreter"));
        assert!(core.check_handle(&handle).is_err());
        assert_eq!(core.loaded_handles(), 0);

        core.register_handle(&handle);
        assert!(core.check_handle(&handle).is_ok());
        assert_eq!(core.loaded_handles(), 1);
    }

    #[test]
    fn test_terminated_is_sticky() {
        let core = AdapterCore::new(RuntimeKind::Tensor, AdapterOptions::default());
        core.terminate();
        core.succeed();
        core.fail(RuntimeError::execution("late"));
        assert_eq!(core.status(), RuntimeStatus::Terminated);
        assert_eq!(core.ensure_live().unwrap_err().kind, ErrorKind::Lifecycle);
    }
}
