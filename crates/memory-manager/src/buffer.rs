// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! RAII buffer guard that returns storage to the pool on drop.

use crate::pool::PoolInner;
use crate::BufferUsage;
use std::sync::Arc;

/// A pooled `f32` buffer.
///
/// The guard exposes exactly `len` elements even when the backing storage
/// was rounded up to a larger size class. Dropping the guard hands the
/// storage back to the [`BufferPool`](crate::BufferPool) it came from.
pub struct PooledBuffer {
    data: Vec<f32>,
    len: usize,
    usage: BufferUsage,
    id: u64,
    pool: Arc<PoolInner>,
}

impl PooledBuffer {
    pub(crate) fn new(
        data: Vec<f32>,
        len: usize,
        usage: BufferUsage,
        id: u64,
        pool: Arc<PoolInner>,
    ) -> Self {
        Self {
            data,
            len,
            usage,
            id,
            pool,
        }
    }

    /// Pool-unique buffer id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of usable elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the usable region in bytes.
    pub fn size_bytes(&self) -> usize {
        self.len * std::mem::size_of::<f32>()
    }

    /// Usage flags the buffer was allocated with.
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data[..self.len]
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        self.pool.release(self.id, data, self.len, self.usage);
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("id", &self.id)
            .field("len", &self.len)
            .field("usage", &self.usage)
            .finish()
    }
}
