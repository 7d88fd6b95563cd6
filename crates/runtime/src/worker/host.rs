// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The interpreter worker: a dedicated OS thread that owns every loaded
//! script and answers protocol requests.

use super::protocol::{
    InitPayload, LoadPayload, PredictPayload, Request, RequestType, Response, ResponseType,
    UnloadPayload, FAULT_ID,
};
use super::script::{Program, ScriptError, ScriptErrorKind, DEFAULT_MEMORY_LIMIT};
use crate::adapter::Progress;
use crate::{ErrorKind, RuntimeError};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Stack for the worker thread; deep script recursion needs more than the
/// default.
const WORKER_STACK_BYTES: usize = 32 * 1024 * 1024;

/// Channels connected to a running worker.
pub struct WorkerChannels {
    /// JSON requests to the worker. Dropping it stops the worker.
    pub requests: mpsc::Sender<String>,
    /// JSON responses from the worker. Closes when the worker exits.
    pub responses: UnboundedReceiver<String>,
}

/// Starts a worker thread.
pub fn spawn_worker() -> Result<WorkerChannels, RuntimeError> {
    let (request_tx, request_rx) = mpsc::channel::<String>();
    let (response_tx, response_rx) = unbounded_channel::<String>();

    std::thread::Builder::new()
        .name("polyrt-worker".into())
        .stack_size(WORKER_STACK_BYTES)
        .spawn(move || run(request_rx, response_tx))
        .map_err(|e| RuntimeError::initialization(format!("cannot spawn worker thread: {e}")))?;

    Ok(WorkerChannels {
        requests: request_tx,
        responses: response_rx,
    })
}

fn run(requests: mpsc::Receiver<String>, out: UnboundedSender<String>) {
    tracing::debug!("worker started");
    let mut state = WorkerState::default();
    for line in requests {
        let outcome = catch_unwind(AssertUnwindSafe(|| process(&mut state, &line, &out)));
        if let Err(panic) = outcome {
            let err = RuntimeError::execution(format!("worker fault: {}", panic_message(&*panic)));
            send(&out, &Response::error(FAULT_ID, &err));
        }
    }
    tracing::debug!(models = state.models.len(), "worker exiting");
}

fn process(state: &mut WorkerState, line: &str, out: &UnboundedSender<String>) {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            let err = RuntimeError::execution(format!("undecodable worker message: {e}"));
            send(out, &Response::error(FAULT_ID, &err));
            return;
        }
    };

    let id = request.id;
    let emit = |progress: Progress| send(out, &Response::progress(id, progress));
    let response = match catch_unwind(AssertUnwindSafe(|| state.handle(request, &emit))) {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => Response::error(id, &err),
        Err(panic) => Response::error(
            id,
            &RuntimeError::execution(format!("handler panicked: {}", panic_message(&*panic))),
        ),
    };
    send(out, &response);
}

fn send(out: &UnboundedSender<String>, response: &Response) {
    match serde_json::to_string(response) {
        Ok(text) => {
            // A closed channel means the host is gone; nothing left to tell.
            let _ = out.send(text);
        }
        Err(e) => tracing::error!(error = %e, "cannot encode worker response"),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

struct LoadedModel {
    program: Program,
    entry: String,
}

#[derive(Default)]
struct WorkerState {
    initialized: bool,
    init_count: u32,
    packages: Vec<String>,
    memory_limit: Option<usize>,
    models: BTreeMap<String, LoadedModel>,
}

fn script_error(kind: ErrorKind, context: &str, err: &ScriptError) -> RuntimeError {
    let kind = match err.kind {
        ScriptErrorKind::Memory => ErrorKind::Memory,
        _ => kind,
    };
    RuntimeError::new(kind, format!("{context}: {err}")).with_native(err.traceback())
}

fn decode<T: serde::de::DeserializeOwned>(payload: Option<Value>) -> Result<T, RuntimeError> {
    serde_json::from_value(payload.unwrap_or(Value::Null))
        .map_err(|e| RuntimeError::validation(format!("malformed request payload: {e}")))
}

impl WorkerState {
    fn handle(&mut self, request: Request, emit: &dyn Fn(Progress)) -> Result<Response, RuntimeError> {
        let id = request.id;
        if request.kind != RequestType::Init && !self.initialized {
            return Err(RuntimeError::lifecycle("worker is not initialized"));
        }
        match request.kind {
            RequestType::Init => {
                let payload: InitPayload = match request.payload {
                    Some(p) => decode(Some(p))?,
                    None => InitPayload::default(),
                };
                if !self.initialized {
                    self.initialized = true;
                    self.init_count += 1;
                    self.packages = payload.packages;
                    self.memory_limit = payload
                        .memory_limit_bytes
                        .map(|bytes| usize::try_from(bytes).unwrap_or(usize::MAX));
                    tracing::info!(packages = ?self.packages, memory_limit = ?self.memory_limit, "worker initialized");
                }
                Ok(Response::ok(
                    id,
                    ResponseType::Initialized,
                    json!({ "initCount": self.init_count, "packages": self.packages }),
                ))
            }
            RequestType::LoadModel => {
                let payload: LoadPayload = decode(request.payload)?;
                self.load(payload, emit).map(|loaded| Response::ok(id, ResponseType::Loaded, loaded))
            }
            RequestType::Predict => {
                let payload: PredictPayload = decode(request.payload)?;
                let model = self.models.get(&payload.model_id).ok_or_else(|| {
                    RuntimeError::validation(format!("model '{}' is not loaded", payload.model_id))
                })?;
                let output = model
                    .program
                    .call_json(&model.entry, &payload.input)
                    .map_err(|e| script_error(ErrorKind::Execution, "script failed", &e))?;
                Ok(Response::ok(id, ResponseType::Predicted, output))
            }
            RequestType::Unload => {
                let payload: UnloadPayload = decode(request.payload)?;
                let removed = self.models.remove(&payload.model_id).is_some();
                Ok(Response::ok(
                    id,
                    ResponseType::Unloaded,
                    json!({ "modelId": payload.model_id, "removed": removed }),
                ))
            }
            RequestType::Status => Ok(Response::ok(
                id,
                ResponseType::Status,
                json!({
                    "initialized": self.initialized,
                    "initCount": self.init_count,
                    "packages": self.packages,
                    "models": self.models.keys().collect::<Vec<_>>(),
                }),
            )),
        }
    }

    fn load(&mut self, payload: LoadPayload, emit: &dyn Fn(Progress)) -> Result<Value, RuntimeError> {
        let entry = payload.manifest.entry_function.clone();
        emit(Progress::new("parse", 0.1));
        let limit = self.memory_limit.unwrap_or(DEFAULT_MEMORY_LIMIT);
        let mut program = Program::load_with_limit(&payload.code, payload.files, limit).map_err(|e| match e.kind {
            ScriptErrorKind::Syntax => script_error(ErrorKind::Loading, "script does not parse", &e),
            ScriptErrorKind::Runtime | ScriptErrorKind::Memory => {
                script_error(ErrorKind::Loading, "top-level binding failed", &e)
            }
        })?;
        emit(Progress::new("evaluate", 0.6));

        match program.get(&entry) {
            None => {
                return Err(RuntimeError::loading(format!(
                    "entry function '{entry}' is not defined"
                )))
            }
            Some(value) if !program.is_function(&entry) => {
                return Err(RuntimeError::loading(format!(
                    "entry '{entry}' is a {}, not a function",
                    value.type_name()
                )))
            }
            Some(_) => {}
        }
        program.define_default(
            "get_model_info",
            json!({
                "name": payload.manifest.name,
                "version": payload.manifest.version,
                "inputs": payload.manifest.inputs,
                "outputs": payload.manifest.outputs,
            }),
        );
        let functions = program.function_names();
        emit(Progress::new("ready", 1.0));
        tracing::debug!(model = %payload.model_id, entry = %entry, "script loaded");

        self.models.insert(payload.model_id.clone(), LoadedModel { program, entry });
        Ok(json!({ "modelId": payload.model_id, "functions": functions }))
    }
}
