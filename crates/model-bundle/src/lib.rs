// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # model-bundle
//!
//! The unit a host hands to an execution backend: a [`Manifest`] plus its
//! payload (script code and named file blobs), sealed by a SHA-256 digest.
//!
//! - [`Manifest`] / [`IoSpec`] / [`FileRecord`]: the JSON descriptor.
//! - [`ModelBundle`]: immutable and cheap to clone; built with
//!   [`BundleBuilder`] or read from disk with [`BundleLoader`].
//! - [`RuntimeKind`]: the four backends a manifest can target.
//! - [`formats`]: the model payloads the backends understand
//!   (operator graphs, layered models, compute programs).
//!
//! # Integrity
//! The payload digest is SHA-256 over the code bytes (when present), then
//! for every file in name order: the name bytes, a NUL byte, the content.
//! [`ModelBundle::verify`] checks manifest completeness, every per-file
//! record and the payload digest.
//!
//! # Example
//! ```
//! use model_bundle::{BundleBuilder, IoSpec, RuntimeKind};
//!
//! let bundle = BundleBuilder::new("scaler", "1.0.0", "interpreter")
//!     .code("model.rt", "fn predict(input) = sum(input.x) * 0.5;")
//!     .input(IoSpec::new("x", "float32").with_shape(vec![3]))
//!     .output(IoSpec::new("y", "float32"))
//!     .build();
//!
//! assert!(bundle.verify().is_ok());
//! assert_eq!(bundle.declared_runtime().unwrap(), Some(RuntimeKind::Interpreter));
//! ```

mod bundle;
mod error;
pub mod formats;
mod integrity;
mod loader;
mod manifest;
mod runtime_kind;

pub use bundle::{BundleBuilder, ModelBundle};
pub use error::BundleError;
pub use formats::ModelFormat;
pub use integrity::{payload_digest, sha256_hex};
pub use loader::{BundleLoader, MANIFEST_FILE};
pub use manifest::{FileRecord, IoSpec, Manifest, DEFAULT_ENTRY_FUNCTION};
pub use runtime_kind::RuntimeKind;
