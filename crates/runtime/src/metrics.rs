// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pipeline profiling metrics.
//!
//! Every [`Pipeline::process`](crate::Pipeline::process) call returns a
//! [`PipelineMetadata`] describing that call; [`PipelineMetrics`]
//! accumulates across calls for the lifetime of a pipeline.

use std::time::Duration;

/// Timing for one stage of one pipeline call.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTiming {
    pub stage: String,
    pub duration_ms: f64,
    pub cache_hit: bool,
    /// Number of predict invocations, including retries. Zero on a cache hit.
    pub attempts: u32,
    pub failed: bool,
}

/// Per-call metadata attached to every pipeline result.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineMetadata {
    pub stage_timings: Vec<StageTiming>,
    /// `"<stage>: <error>"` for every stage that failed in `continue` mode.
    pub errors: Vec<String>,
    pub cache_hits: u64,
    /// Wall-clock time of the whole call in milliseconds.
    pub total_duration: f64,
}

impl PipelineMetadata {
    pub fn record(&mut self, timing: StageTiming) {
        if timing.cache_hit {
            self.cache_hits += 1;
        }
        self.stage_timings.push(timing);
    }

    pub fn finalise(&mut self, total: Duration) {
        self.total_duration = total.as_secs_f64() * 1000.0;
    }
}

/// Counters accumulated over the lifetime of a pipeline.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineMetrics {
    pub calls: u64,
    pub stage_runs: u64,
    pub cache_hits: u64,
    pub retries: u64,
    pub failures: u64,
    pub total_duration: Duration,
}

impl PipelineMetrics {
    /// Folds one call's metadata into the totals.
    pub fn absorb(&mut self, metadata: &PipelineMetadata) {
        self.calls += 1;
        self.cache_hits += metadata.cache_hits;
        for timing in &metadata.stage_timings {
            self.stage_runs += 1;
            self.retries += u64::from(timing.attempts.saturating_sub(1));
            if timing.failed {
                self.failures += 1;
            }
        }
        self.total_duration += Duration::from_secs_f64(metadata.total_duration.max(0.0) / 1000.0);
    }

    /// Fraction of stage runs served from the cache.
    pub fn cache_hit_ratio(&self) -> f64 {
        if self.stage_runs == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / self.stage_runs as f64
    }

    /// Mean wall-clock time per call in milliseconds.
    pub fn mean_call_ms(&self) -> f64 {
        if self.calls == 0 {
            return 0.0;
        }
        self.total_duration.as_secs_f64() * 1000.0 / self.calls as f64
    }

    /// Returns a human-readable summary suitable for CLI output.
    pub fn summary(&self) -> String {
        format!(
            "Pipeline: {} calls, {:.2}ms mean, {} stage runs, {} cache hits ({:.0}%), \
             {} retries, {} failures",
            self.calls,
            self.mean_call_ms(),
            self.stage_runs,
            self.cache_hits,
            self.cache_hit_ratio() * 100.0,
            self.retries,
            self.failures,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing(stage: &str, cache_hit: bool, attempts: u32, failed: bool) -> StageTiming {
        StageTiming {
            stage: stage.into(),
            duration_ms: 1.0,
            cache_hit,
            attempts,
            failed,
        }
    }

    #[test]
    fn test_empty_metrics() {
        let m = PipelineMetrics::default();
        assert_eq!(m.cache_hit_ratio(), 0.0);
        assert_eq!(m.mean_call_ms(), 0.0);
    }

    #[test]
    fn test_absorb() {
        let mut meta = PipelineMetadata::default();
        meta.record(timing("a", true, 0, false));
        meta.record(timing("b", false, 3, false));
        meta.record(timing("c", false, 4, true));
        meta.finalise(Duration::from_millis(20));
        assert_eq!(meta.cache_hits, 1);

        let mut m = PipelineMetrics::default();
        m.absorb(&meta);
        m.absorb(&meta);
        assert_eq!(m.calls, 2);
        assert_eq!(m.stage_runs, 6);
        assert_eq!(m.cache_hits, 2);
        assert_eq!(m.retries, 10);
        assert_eq!(m.failures, 2);
        assert!((m.mean_call_ms() - 20.0).abs() < 0.01);
    }

    #[test]
    fn test_metadata_serializes_camel_case() {
        let mut meta = PipelineMetadata::default();
        meta.record(timing("a", false, 1, false));
        let json = serde_json::to_value(&meta).unwrap();
        assert!(json["stageTimings"][0]["durationMs"].is_number());
        assert_eq!(json["cacheHits"], 0);
        assert!(json.get("totalDuration").is_some());
    }

    #[test]
    fn test_summary_format() {
        let mut meta = PipelineMetadata::default();
        meta.record(timing("a", true, 0, false));
        let mut m = PipelineMetrics::default();
        m.absorb(&meta);
        let s = m.summary();
        assert!(s.contains("Pipeline: 1 calls"));
        assert!(s.contains("1 cache hits (100%)"));
    }
}
