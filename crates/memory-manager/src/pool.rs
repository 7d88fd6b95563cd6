// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Budget-enforced buffer pool.
//!
//! The [`BufferPool`] is the allocator behind tensor intermediates and
//! compute-device buffers. It:
//!
//! 1. Enforces a hard memory ceiling. Allocations that would exceed the
//!    budget return [`MemoryError::OutOfMemory`].
//! 2. Keeps returned buffers in free lists binned by size class and usage,
//!    so a predict loop reuses the same storage call after call.
//! 3. Counts live buffers. Backends that promise to release every
//!    intermediate check [`BufferPool::live_buffers`] after each call, or
//!    allocate through an [`AllocationScope`] and reclaim what it leaked.
//!
//! # Size Classes
//! Requests are rounded up to the next power of two elements (minimum
//! [`MIN_SIZE_CLASS`]). The budget is charged for the requested size only.

use crate::{AllocationStats, BufferUsage, MemoryBudget, MemoryError, PooledBuffer};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Minimum size class in elements.
pub const MIN_SIZE_CLASS: usize = 64;

type FreeKey = (usize, u32);

/// State shared between the pool and its outstanding buffers.
pub struct PoolInner {
    budget: MemoryBudget,
    allocated_bytes: AtomicUsize,
    live_buffers: AtomicUsize,
    next_id: AtomicU64,
    free: Mutex<HashMap<FreeKey, Vec<Vec<f32>>>>,
    free_list_bytes: AtomicUsize,
    stats: Mutex<AllocationStats>,
    ids: Mutex<BufferIds>,
}

#[derive(Default)]
struct BufferIds {
    live: HashSet<u64>,
    /// Still held, but their budget was already returned.
    reclaimed: HashSet<u64>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PoolInner {
    /// Called by `PooledBuffer::drop`.
    pub(crate) fn release(&self, id: u64, data: Vec<f32>, len: usize, usage: BufferUsage) {
        let charged = {
            let mut ids = lock(&self.ids);
            ids.live.remove(&id);
            !ids.reclaimed.remove(&id)
        };
        if charged {
            self.uncharge(len);
        }
        self.recycle(data, usage);
    }

    fn uncharge(&self, len: usize) {
        let bytes = len * std::mem::size_of::<f32>();
        self.allocated_bytes.fetch_sub(bytes, Ordering::AcqRel);
        self.live_buffers.fetch_sub(1, Ordering::AcqRel);

        if let Ok(mut stats) = self.stats.lock() {
            stats.record_deallocation();
        }
    }

    /// Returns the budget of a live buffer without waiting for its drop.
    fn reclaim(&self, id: u64, len: usize) -> bool {
        {
            let mut ids = lock(&self.ids);
            if !ids.live.remove(&id) {
                return false;
            }
            ids.reclaimed.insert(id);
        }
        self.uncharge(len);
        true
    }

    fn is_live(&self, id: u64) -> bool {
        lock(&self.ids).live.contains(&id)
    }

    fn recycle(&self, data: Vec<f32>, usage: BufferUsage) {
        if data.is_empty() {
            return;
        }
        self.free_list_bytes
            .fetch_add(data.len() * std::mem::size_of::<f32>(), Ordering::AcqRel);
        if let Ok(mut free) = self.free.lock() {
            free.entry((data.len(), usage.bits())).or_default().push(data);
        }
    }
}

/// A pool of reusable `f32` buffers under a memory budget.
///
/// Cloning a pool yields another handle to the same storage.
///
/// # Example
/// ```
/// use memory_manager::{BufferPool, BufferUsage, MemoryBudget};
///
/// let pool = BufferPool::new(MemoryBudget::from_bytes(1024));
/// let _a = pool.allocate(128, BufferUsage::STORAGE).unwrap();
/// assert!(pool.allocate(256, BufferUsage::STORAGE).is_err());
/// ```
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Creates an empty pool with the given budget.
    pub fn new(budget: MemoryBudget) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                budget,
                allocated_bytes: AtomicUsize::new(0),
                live_buffers: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
                free: Mutex::new(HashMap::new()),
                free_list_bytes: AtomicUsize::new(0),
                stats: Mutex::new(AllocationStats::default()),
                ids: Mutex::new(BufferIds::default()),
            }),
        }
    }

    /// Allocates a zeroed buffer of `len` elements.
    ///
    /// A free buffer of the same size class and usage is reused when one is
    /// available; otherwise fresh storage is allocated.
    pub fn allocate(&self, len: usize, usage: BufferUsage) -> Result<PooledBuffer, MemoryError> {
        if len == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }
        let bytes = len * std::mem::size_of::<f32>();
        let budget = self.inner.budget.as_bytes();

        // Reserve against the budget first so concurrent callers cannot
        // overshoot it together.
        let reserved = self.inner.allocated_bytes.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |current| current.checked_add(bytes).filter(|&total| total <= budget),
        );
        let current = match reserved {
            Ok(previous) => previous + bytes,
            Err(current) => {
                if let Ok(mut stats) = self.inner.stats.lock() {
                    stats.record_oom();
                }
                tracing::warn!(
                    requested = bytes,
                    allocated = current,
                    budget,
                    "buffer pool exhausted"
                );
                return Err(MemoryError::OutOfMemory {
                    requested_bytes: bytes,
                    available_bytes: budget.saturating_sub(current),
                    budget_bytes: budget,
                });
            }
        };

        let class = size_class_for(len);
        let reused = self
            .inner
            .free
            .lock()
            .ok()
            .and_then(|mut free| free.get_mut(&(class, usage.bits())).and_then(Vec::pop));

        let is_hit = reused.is_some();
        let data = match reused {
            Some(mut buf) => {
                self.inner
                    .free_list_bytes
                    .fetch_sub(buf.len() * std::mem::size_of::<f32>(), Ordering::AcqRel);
                buf[..len].fill(0.0);
                buf
            }
            None => vec![0.0; class],
        };

        self.inner.live_buffers.fetch_add(1, Ordering::AcqRel);
        if let Ok(mut stats) = self.inner.stats.lock() {
            if is_hit {
                stats.record_cache_hit(bytes);
            } else {
                stats.record_cache_miss(bytes);
            }
            stats.update_peak(current);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.ids).live.insert(id);
        Ok(PooledBuffer::new(data, len, usage, id, Arc::clone(&self.inner)))
    }

    /// Allocates a buffer and fills it with `values`.
    pub fn allocate_from(
        &self,
        values: &[f32],
        usage: BufferUsage,
    ) -> Result<PooledBuffer, MemoryError> {
        let mut buf = self.allocate(values.len(), usage)?;
        buf.as_mut_slice().copy_from_slice(values);
        Ok(buf)
    }

    /// Bytes currently held by live buffers.
    pub fn allocated_bytes(&self) -> usize {
        self.inner.allocated_bytes.load(Ordering::Acquire)
    }

    /// Bytes remaining before the budget is hit.
    pub fn available_bytes(&self) -> usize {
        self.inner
            .budget
            .as_bytes()
            .saturating_sub(self.allocated_bytes())
    }

    /// Number of buffers handed out and not yet dropped.
    pub fn live_buffers(&self) -> usize {
        self.inner.live_buffers.load(Ordering::Acquire)
    }

    /// Returns the memory budget.
    pub fn budget(&self) -> MemoryBudget {
        self.inner.budget
    }

    /// Returns a snapshot of allocation statistics.
    pub fn stats(&self) -> AllocationStats {
        self.inner
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Drops every cached free buffer. Live buffers are unaffected.
    pub fn shrink(&self) {
        if let Ok(mut free) = self.inner.free.lock() {
            free.clear();
            self.inner.free_list_bytes.store(0, Ordering::Release);
        }
    }

    /// Approximate bytes held in the free lists.
    pub fn free_list_bytes(&self) -> usize {
        self.inner.free_list_bytes.load(Ordering::Acquire)
    }

    /// Starts tracking a group of allocations.
    pub fn scope(&self) -> AllocationScope {
        AllocationScope {
            pool: self.clone(),
            issued: Mutex::new(Vec::new()),
        }
    }
}

/// Allocations made for one computation.
///
/// Buffers still live when the computation ends are leaks; [`reclaim`]
/// returns their budget to the pool at once and their storage joins the
/// free list whenever the holder finally drops them.
///
/// [`reclaim`]: AllocationScope::reclaim
pub struct AllocationScope {
    pool: BufferPool,
    issued: Mutex<Vec<(u64, usize)>>,
}

impl AllocationScope {
    pub fn allocate(&self, len: usize, usage: BufferUsage) -> Result<PooledBuffer, MemoryError> {
        let buffer = self.pool.allocate(len, usage)?;
        lock(&self.issued).push((buffer.id(), len));
        Ok(buffer)
    }

    /// Buffers from this scope not yet dropped.
    pub fn live_buffers(&self) -> usize {
        lock(&self.issued)
            .iter()
            .filter(|(id, _)| self.pool.inner.is_live(*id))
            .count()
    }

    /// Returns the budget of every live buffer from this scope; the number
    /// reclaimed.
    pub fn reclaim(&self) -> usize {
        let issued = std::mem::take(&mut *lock(&self.issued));
        issued
            .into_iter()
            .filter(|&(id, len)| self.pool.inner.reclaim(id, len))
            .count()
    }
}

/// Smallest power of two that is ≥ `len` and ≥ [`MIN_SIZE_CLASS`].
fn size_class_for(len: usize) -> usize {
    len.max(MIN_SIZE_CLASS).next_power_of_two()
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("budget", &self.inner.budget)
            .field("allocated_bytes", &self.allocated_bytes())
            .field("live_buffers", &self.live_buffers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(bytes: usize) -> BufferPool {
        BufferPool::new(MemoryBudget::from_bytes(bytes))
    }

    #[test]
    fn test_allocate_and_drop() {
        let pool = pool(1 << 20);
        let buf = pool.allocate(100, BufferUsage::STORAGE).unwrap();
        assert_eq!(buf.len(), 100);
        assert_eq!(pool.allocated_bytes(), 400);
        assert_eq!(pool.live_buffers(), 1);

        drop(buf);
        assert_eq!(pool.allocated_bytes(), 0);
        assert_eq!(pool.live_buffers(), 0);
    }

    #[test]
    fn test_oom() {
        let pool = pool(1024);
        let _a = pool.allocate(128, BufferUsage::STORAGE).unwrap();
        let _b = pool.allocate(128, BufferUsage::STORAGE).unwrap();
        let err = pool.allocate(1, BufferUsage::STORAGE).unwrap_err();
        assert!(matches!(
            err,
            MemoryError::OutOfMemory {
                requested_bytes: 4,
                available_bytes: 0,
                budget_bytes: 1024
            }
        ));
        assert_eq!(pool.stats().oom_count, 1);
    }

    #[test]
    fn test_zero_allocation() {
        let pool = pool(1024);
        assert!(matches!(
            pool.allocate(0, BufferUsage::STORAGE),
            Err(MemoryError::ZeroSizedAllocation)
        ));
    }

    #[test]
    fn test_reuse_requires_matching_usage() {
        let pool = pool(1 << 20);
        drop(pool.allocate(100, BufferUsage::STORAGE).unwrap());

        let _staging = pool
            .allocate(100, BufferUsage::MAP_READ | BufferUsage::COPY_DST)
            .unwrap();
        assert_eq!(pool.stats().cache_hits, 0);

        let _storage = pool.allocate(120, BufferUsage::STORAGE).unwrap();
        assert_eq!(pool.stats().cache_hits, 1);
    }

    #[test]
    fn test_reused_buffer_is_zeroed() {
        let pool = pool(1 << 20);
        let mut buf = pool.allocate(64, BufferUsage::STORAGE).unwrap();
        buf.as_mut_slice().fill(7.0);
        drop(buf);

        let again = pool.allocate(64, BufferUsage::STORAGE).unwrap();
        assert!(again.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_allocate_from() {
        let pool = pool(1 << 20);
        let buf = pool
            .allocate_from(&[1.0, 2.0, 3.0], BufferUsage::STORAGE)
            .unwrap();
        assert_eq!(buf.as_slice(), &[1.0, 2.0, 3.0]);
        assert_eq!(buf.size_bytes(), 12);
    }

    #[test]
    fn test_shrink_clears_free_list() {
        let pool = pool(1 << 20);
        drop(pool.allocate(10, BufferUsage::STORAGE).unwrap());
        assert!(pool.free_list_bytes() > 0);
        pool.shrink();
        assert_eq!(pool.free_list_bytes(), 0);
    }

    #[test]
    fn test_peak_and_ids() {
        let pool = pool(1 << 20);
        let a = pool.allocate(250, BufferUsage::STORAGE).unwrap();
        let b = pool.allocate(500, BufferUsage::STORAGE).unwrap();
        assert_ne!(a.id(), b.id());
        drop(a);
        drop(b);
        assert_eq!(pool.stats().peak_allocated_bytes, 3000);
    }

    #[test]
    fn test_scope_reclaims_leaked_buffers() {
        let pool = pool(1 << 20);
        let scope = pool.scope();
        let kept = scope.allocate(100, BufferUsage::STORAGE).unwrap();
        let dropped = scope.allocate(10, BufferUsage::STORAGE).unwrap();
        drop(dropped);
        assert_eq!(scope.live_buffers(), 1);
        assert_eq!(pool.allocated_bytes(), 400);

        assert_eq!(scope.reclaim(), 1);
        assert_eq!(pool.live_buffers(), 0);
        assert_eq!(pool.allocated_bytes(), 0);
        assert_eq!(scope.live_buffers(), 0);

        // The late drop only hands the storage back.
        let free_before = pool.free_list_bytes();
        drop(kept);
        assert_eq!(pool.live_buffers(), 0);
        assert_eq!(pool.allocated_bytes(), 0);
        assert_eq!(pool.free_list_bytes(), free_before + 128 * 4);
    }

    #[test]
    fn test_forgotten_buffer_budget_comes_back() {
        let pool = pool(1024);
        let scope = pool.scope();
        std::mem::forget(scope.allocate(200, BufferUsage::STORAGE).unwrap());
        assert!(pool.allocate(200, BufferUsage::STORAGE).is_err());
        assert_eq!(scope.reclaim(), 1);
        assert!(pool.allocate(200, BufferUsage::STORAGE).is_ok());
    }

    #[test]
    fn test_size_class() {
        assert_eq!(size_class_for(1), MIN_SIZE_CLASS);
        assert_eq!(size_class_for(64), 64);
        assert_eq!(size_class_for(65), 128);
    }
}
