// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Allocation statistics for profiling and diagnostics.

/// Cumulative statistics about pool usage.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AllocationStats {
    /// Total number of allocation requests, including failed ones.
    pub total_allocations: u64,
    /// Allocations served from a free list.
    pub cache_hits: u64,
    /// Allocations that required fresh storage.
    pub cache_misses: u64,
    /// Requests rejected because the budget was exhausted.
    pub oom_count: u64,
    /// High-water mark of live bytes.
    pub peak_allocated_bytes: usize,
    /// Total bytes ever handed out.
    pub cumulative_allocated_bytes: u64,
    /// Buffers returned to the pool.
    pub total_deallocations: u64,
}

impl AllocationStats {
    /// Free-list hit ratio in `[0.0, 1.0]`; `0.0` before any allocation.
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / total as f64
    }

    pub(crate) fn record_cache_hit(&mut self, bytes: usize) {
        self.total_allocations += 1;
        self.cache_hits += 1;
        self.cumulative_allocated_bytes += bytes as u64;
    }

    pub(crate) fn record_cache_miss(&mut self, bytes: usize) {
        self.total_allocations += 1;
        self.cache_misses += 1;
        self.cumulative_allocated_bytes += bytes as u64;
    }

    pub(crate) fn record_oom(&mut self) {
        self.total_allocations += 1;
        self.oom_count += 1;
    }

    pub(crate) fn record_deallocation(&mut self) {
        self.total_deallocations += 1;
    }

    pub(crate) fn update_peak(&mut self, current_bytes: usize) {
        self.peak_allocated_bytes = self.peak_allocated_bytes.max(current_bytes);
    }

    /// Returns a one-line human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "{} allocations ({} reused, {:.0}% hit rate), {} OOMs, peak {:.2} KB, {} released",
            self.total_allocations,
            self.cache_hits,
            self.cache_hit_ratio() * 100.0,
            self.oom_count,
            self.peak_allocated_bytes as f64 / 1024.0,
            self.total_deallocations,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_ratio() {
        let mut s = AllocationStats::default();
        assert_eq!(s.cache_hit_ratio(), 0.0);
        s.record_cache_hit(4);
        s.record_cache_miss(4);
        assert!((s.cache_hit_ratio() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_peak_never_decreases() {
        let mut s = AllocationStats::default();
        s.update_peak(100);
        s.update_peak(50);
        assert_eq!(s.peak_allocated_bytes, 100);
    }

    #[test]
    fn test_summary() {
        let mut s = AllocationStats::default();
        s.record_cache_miss(2048);
        s.record_oom();
        let text = s.summary();
        assert!(text.starts_with("2 allocations"));
        assert!(text.contains("1 OOMs"));
    }
}
