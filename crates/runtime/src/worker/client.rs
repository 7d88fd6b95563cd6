// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Host side of the worker protocol.
//!
//! ```text
//! request() ──▶ pending[id] = oneshot ──▶ worker thread
//!                                             │
//! dispatcher task ◀── responses ◀─────────────┘
//!   id 0         → fault sink
//!   progress     → pending[id].progress callback
//!   terminal     → pending.remove(id) → oneshot
//!   channel shut → every pending request fails
//! ```

use super::host::{spawn_worker, WorkerChannels};
use super::protocol::{Request, RequestType, Response, ResponseType, FAULT_ID};
use crate::adapter::ProgressCallback;
use crate::RuntimeError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;

/// Receives worker errors that belong to no request.
pub type FaultSink = Arc<dyn Fn(RuntimeError) + Send + Sync>;

struct PendingRequest {
    kind: RequestType,
    reply: oneshot::Sender<Result<Response, RuntimeError>>,
    progress: Option<ProgressCallback>,
}

type PendingMap = Arc<Mutex<HashMap<u64, PendingRequest>>>;

fn lock(pending: &PendingMap) -> MutexGuard<'_, HashMap<u64, PendingRequest>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A connection to one worker thread.
pub struct WorkerClient {
    requests: Mutex<Option<mpsc::Sender<String>>>,
    pending: PendingMap,
    next_id: AtomicU64,
    closing: Arc<AtomicBool>,
}

impl WorkerClient {
    /// Spawns a worker and its response dispatcher. Must be called from
    /// within a tokio runtime.
    pub fn spawn(faults: FaultSink) -> Result<Self, RuntimeError> {
        let WorkerChannels {
            requests,
            mut responses,
        } = spawn_worker()?;
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closing = Arc::new(AtomicBool::new(false));

        let dispatch_pending = Arc::clone(&pending);
        let dispatch_closing = Arc::clone(&closing);
        tokio::spawn(async move {
            while let Some(text) = responses.recv().await {
                dispatch(&dispatch_pending, &faults, &text);
            }
            let orphaned: Vec<_> = lock(&dispatch_pending).drain().collect();
            for (id, request) in orphaned {
                let _ = request.reply.send(Err(RuntimeError::execution(format!(
                    "worker exited before answering request {id} ({:?})",
                    request.kind
                ))));
            }
            if !dispatch_closing.load(Ordering::SeqCst) {
                tracing::error!("worker exited unexpectedly");
                faults(RuntimeError::execution("worker exited unexpectedly"));
            } else {
                tracing::debug!("worker stopped");
            }
        });
        tracing::info!("worker spawned");

        Ok(Self {
            requests: Mutex::new(Some(requests)),
            pending,
            next_id: AtomicU64::new(1),
            closing,
        })
    }

    /// Sends a request and waits for its terminal response.
    ///
    /// On timeout the request is forgotten and a `timeout` error returned;
    /// the worker is not interrupted and a late reply is dropped.
    pub async fn request(
        &self,
        kind: RequestType,
        payload: Option<Value>,
        timeout: Duration,
        progress: Option<ProgressCallback>,
    ) -> Result<Value, RuntimeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let text = serde_json::to_string(&Request { id, kind, payload })
            .map_err(|e| RuntimeError::execution(format!("cannot encode request: {e}")))?;

        let (reply, receiver) = oneshot::channel();
        lock(&self.pending).insert(
            id,
            PendingRequest {
                kind,
                reply,
                progress,
            },
        );
        if let Err(err) = self.send_raw(text) {
            lock(&self.pending).remove(&id);
            return Err(err);
        }
        tracing::trace!(id, ?kind, "worker request sent");

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(Ok(response))) => response.into_result(),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_)) => Err(RuntimeError::execution("worker dropped the request")),
            Err(_) => {
                lock(&self.pending).remove(&id);
                tracing::warn!(id, ?kind, timeout_ms = timeout.as_millis() as u64, "worker request timed out");
                Err(RuntimeError::timeout(format!(
                    "{kind:?} request {id} exceeded {}ms",
                    timeout.as_millis()
                )))
            }
        }
    }

    pub(crate) fn send_raw(&self, text: String) -> Result<(), RuntimeError> {
        let guard = self
            .requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match guard.as_ref() {
            Some(sender) => sender
                .send(text)
                .map_err(|_| RuntimeError::execution("worker has exited")),
            None => Err(RuntimeError::lifecycle("worker has been shut down")),
        }
    }

    /// Number of requests awaiting a reply.
    pub fn pending(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Stops the worker. Pending requests fail; no fault is raised.
    pub fn shutdown(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }
}

impl Drop for WorkerClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch(pending: &PendingMap, faults: &FaultSink, text: &str) {
    let response: Response = match serde_json::from_str(text) {
        Ok(response) => response,
        Err(e) => {
            faults(RuntimeError::execution(format!("undecodable worker response: {e}")));
            return;
        }
    };

    if response.id == FAULT_ID {
        let err = response
            .into_result()
            .err()
            .unwrap_or_else(|| RuntimeError::execution("worker fault without details"));
        tracing::warn!(error = %err, "worker fault");
        faults(err);
        return;
    }

    if response.kind == ResponseType::Progress {
        let callback = lock(pending)
            .get(&response.id)
            .and_then(|p| p.progress.clone());
        if let (Some(callback), Some(progress)) = (callback, response.progress.as_ref()) {
            callback(progress);
        }
        return;
    }

    match lock(pending).remove(&response.id) {
        Some(request) => {
            let _ = request.reply.send(Ok(response));
        }
        None => tracing::debug!(id = response.id, "dropping reply for a forgotten request"),
    }
}
