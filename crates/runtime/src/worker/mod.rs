// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The interpreter worker and its host-side client.
//!
//! The worker is an OS thread that owns a script interpreter. The host
//! talks to it only through JSON text messages (see [`protocol`]), so no
//! script state is shared with the caller's threads.

mod client;
mod host;
pub mod protocol;
pub mod script;

pub use client::{FaultSink, WorkerClient};
pub use host::{spawn_worker, WorkerChannels};
