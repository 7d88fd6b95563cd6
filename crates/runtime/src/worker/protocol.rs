// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Messages exchanged with the interpreter worker.
//!
//! Every message is one JSON document:
//!
//! ```text
//! host ──▶ worker   {"id": 3, "type": "predict", "payload": {"modelId": "model-7", "input": {...}}}
//! worker ──▶ host   {"id": 3, "type": "progress", "progress": {"stage": "evaluate", "fraction": 0.5}}
//! worker ──▶ host   {"id": 3, "type": "predicted", "payload": 1.75}
//! worker ──▶ host   {"id": 0, "type": "error", "error": {"kind": "execution", "message": "..."}}
//! ```
//!
//! Ids are chosen by the host, start at 1 and are never reused. Id `0` is
//! reserved for faults that do not belong to any request.

use crate::adapter::Progress;
use crate::{ErrorKind, RuntimeError};
use serde_json::Value;

/// Id carried by worker faults not tied to a request.
pub const FAULT_ID: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestType {
    Init,
    LoadModel,
    Predict,
    Unload,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseType {
    Initialized,
    Progress,
    Loaded,
    Predicted,
    Unloaded,
    Error,
    Status,
}

impl ResponseType {
    /// `true` for every response that completes its request.
    pub fn is_terminal(self) -> bool {
        self != ResponseType::Progress
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Request {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: RequestType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// Error body of an `error` response.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native: Option<String>,
}

impl From<&RuntimeError> for WireError {
    fn from(err: &RuntimeError) -> Self {
        Self {
            kind: err.kind,
            message: err.message.clone(),
            native: err.native.clone(),
        }
    }
}

impl From<WireError> for RuntimeError {
    fn from(wire: WireError) -> Self {
        let err = RuntimeError::new(wire.kind, wire.message);
        match wire.native {
            Some(native) => err.with_native(native),
            None => err,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: ResponseType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
}

impl Response {
    pub fn ok(id: u64, kind: ResponseType, payload: Value) -> Self {
        Self {
            id,
            kind,
            payload: Some(payload),
            error: None,
            progress: None,
        }
    }

    pub fn error(id: u64, err: &RuntimeError) -> Self {
        Self {
            id,
            kind: ResponseType::Error,
            payload: None,
            error: Some(err.into()),
            progress: None,
        }
    }

    pub fn progress(id: u64, progress: Progress) -> Self {
        Self {
            id,
            kind: ResponseType::Progress,
            payload: None,
            error: None,
            progress: Some(progress),
        }
    }

    /// Converts a terminal response into the caller's result.
    pub fn into_result(self) -> Result<Value, RuntimeError> {
        match (self.kind, self.error) {
            (ResponseType::Error, Some(wire)) => Err(wire.into()),
            (ResponseType::Error, None) => {
                Err(RuntimeError::execution("worker reported an error without details"))
            }
            (_, _) => Ok(self.payload.unwrap_or(Value::Null)),
        }
    }
}

/// Payload of a `loadModel` request.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadPayload {
    pub model_id: String,
    pub code: String,
    pub manifest: model_bundle::Manifest,
    /// Bundle files decoded as UTF-8 text; binary files are skipped.
    #[serde(default)]
    pub files: std::collections::BTreeMap<String, String>,
}

/// Payload of a `predict` request.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictPayload {
    pub model_id: String,
    pub input: Value,
}

/// Payload of an `unload` request.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnloadPayload {
    pub model_id: String,
}

/// Payload of an `init` request.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitPayload {
    #[serde(default)]
    pub packages: Vec<String>,
    /// Largest single allocation a script may make, in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit_bytes: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let req = Request {
            id: 4,
            kind: RequestType::LoadModel,
            payload: Some(json!({"modelId": "model-1"})),
        };
        let text = serde_json::to_string(&req).unwrap();
        assert!(text.contains("\"type\":\"loadModel\""));
        let back: Request = serde_json::from_str(&text).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn test_error_response_into_result() {
        let err = RuntimeError::loading("no entry").with_native("Traceback");
        let resp = Response::error(9, &err);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["error"]["kind"], "loading");

        let back = resp.into_result().unwrap_err();
        assert_eq!(back.kind, ErrorKind::Loading);
        assert_eq!(back.native.as_deref(), Some("Traceback"));
    }

    #[test]
    fn test_progress_is_not_terminal() {
        let resp = Response::progress(2, Progress::new("parse", 0.5));
        assert!(!resp.kind.is_terminal());
        assert!(ResponseType::Predicted.is_terminal());
        let parsed: Response =
            serde_json::from_str(r#"{"id":2,"type":"progress","progress":{"stage":"parse","fraction":0.5}}"#)
                .unwrap();
        assert_eq!(parsed, resp);
    }
}
