// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # memory-manager
//!
//! A budget-enforced pool of `f32` buffers shared by the tensor and GPU
//! compute backends.
//!
//! # Key Components
//!
//! - [`MemoryBudget`]: a hard memory ceiling with human-readable parsing
//!   (`"512M"`, `"1G"`, etc.).
//! - [`BufferUsage`]: usage flags attached to every buffer, mirroring the
//!   flags a compute device expects (`STORAGE`, `COPY_DST`, `MAP_READ`, ...).
//!   Free buffers are only reused for requests with identical usage.
//! - [`BufferPool`]: the allocator. Enforces the budget, keeps free lists
//!   binned by size class and usage, and counts live buffers so callers can
//!   assert that a computation released everything it allocated.
//! - [`PooledBuffer`]: an RAII guard. Dropping it returns the storage to the
//!   pool.
//! - [`AllocationScope`]: the buffers of one computation, so leaks can be
//!   counted and their budget reclaimed.
//! - [`AllocationStats`]: cumulative allocator metrics.
//!
//! # Ownership Model
//!
//! ```text
//! BufferPool::allocate(len, usage)
//!       │
//!       ▼
//!   PooledBuffer  ◄─── owns Vec<f32>, holds Arc<PoolInner>
//!       │
//!       │  drop()
//!       ▼
//!   PoolInner::release()  ──► free list[(size class, usage)]
//! ```
//!
//! # Example
//! ```
//! use memory_manager::{BufferPool, BufferUsage, MemoryBudget};
//!
//! let pool = BufferPool::new(MemoryBudget::from_mb(16));
//! let a = pool.allocate(256, BufferUsage::STORAGE).unwrap();
//! assert_eq!(pool.live_buffers(), 1);
//! assert_eq!(pool.allocated_bytes(), 256 * 4);
//!
//! drop(a);
//! assert_eq!(pool.live_buffers(), 0);
//! ```

mod budget;
mod buffer;
mod error;
pub mod pool;
mod stats;
mod usage;

pub use budget::MemoryBudget;
pub use buffer::PooledBuffer;
pub use error::MemoryError;
pub use pool::{AllocationScope, BufferPool};
pub use stats::AllocationStats;
pub use usage::BufferUsage;
