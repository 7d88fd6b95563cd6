// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Multi-stage pipelines.
//!
//! ```text
//!   input ──► stage a ──► ┌ stage b (parallel) ┐ ──► stage d ──► output
//!                         └ stage c (parallel) ┘
//!                          merged {b: .., c: ..}
//! ```
//!
//! Each stage owns one adapter and one loaded model. Consecutive parallel
//! stages form a group that sees the same upstream value. Stage results may
//! be cached per pipeline, and failures are handled per [`ErrorHandling`].

mod cache;

pub use cache::{CacheKey, ResultCache};

use crate::adapter::{Adapter, ModelHandle};
use crate::factory::AdapterSource;
use crate::metrics::{PipelineMetadata, PipelineMetrics, StageTiming};
use crate::RuntimeError;
use futures::future::join_all;
use futures::Stream;
use model_bundle::{ModelBundle, RuntimeKind};
use serde_json::{Map, Value};
use std::fmt;
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

// ── Configuration ──────────────────────────────────────────────

/// What a pipeline does when a stage fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorHandling {
    /// Abort the call with the stage's error.
    #[default]
    FailFast,
    /// Record the error and pass the stage's input downstream.
    Continue,
    /// Re-run the stage with exponential backoff, then continue.
    Retry,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub error_handling: ErrorHandling,
    /// Extra attempts in `retry` mode.
    pub retry_attempts: u32,
    /// Delay before the first retry; doubled for each further one.
    pub retry_delay_ms: u64,
    pub cache_enabled: bool,
    pub max_cache_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            error_handling: ErrorHandling::FailFast,
            retry_attempts: 3,
            retry_delay_ms: 100,
            cache_enabled: true,
            max_cache_size: 100,
        }
    }
}

impl PipelineConfig {
    /// Backoff before retry `n` (1-based).
    pub fn retry_delay(&self, n: u32) -> Duration {
        let factor = 1u64 << n.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_delay_ms.saturating_mul(factor))
    }
}

// ── Stages ─────────────────────────────────────────────────────

pub type Transform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// The model a stage runs, optionally pinned to a runtime.
#[derive(Debug, Clone)]
pub struct StageModel {
    pub bundle: ModelBundle,
    pub runtime: Option<RuntimeKind>,
}

#[derive(Clone)]
pub struct PipelineStage {
    pub name: String,
    pub model: StageModel,
    /// Applied to the stage's input before the cache lookup and predict.
    pub transform: Option<Transform>,
    pub cache: bool,
    pub parallel: bool,
}

impl PipelineStage {
    pub fn new(name: impl Into<String>, bundle: ModelBundle) -> Self {
        Self {
            name: name.into(),
            model: StageModel {
                bundle,
                runtime: None,
            },
            transform: None,
            cache: true,
            parallel: false,
        }
    }

    pub fn with_runtime(mut self, runtime: RuntimeKind) -> Self {
        self.model.runtime = Some(runtime);
        self
    }

    pub fn with_transform(mut self, transform: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache = false;
        self
    }

    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }
}

impl fmt::Debug for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineStage")
            .field("name", &self.name)
            .field("model", &self.model.bundle.name())
            .field("runtime", &self.model.runtime)
            .field("transform", &self.transform.is_some())
            .field("cache", &self.cache)
            .field("parallel", &self.parallel)
            .finish()
    }
}

// ── Results ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PipelineOutput {
    pub output: Value,
    pub metadata: PipelineMetadata,
}

/// One completed stage, as yielded by [`Pipeline::process_stream`].
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct StageRecord {
    pub stage: String,
    pub output: Value,
    pub timing: StageTiming,
}

struct LoadedStage {
    stage: PipelineStage,
    adapter: Arc<dyn Adapter>,
    handle: ModelHandle,
}

struct GroupResult {
    records: Vec<StageRecord>,
    errors: Vec<String>,
    next: Value,
}

struct StageOutcome {
    result: Result<Value, RuntimeError>,
    timing: StageTiming,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Ranges of stage indices run together: a run of parallel stages, or a
/// single sequential stage.
fn groups(stages: &[LoadedStage]) -> Vec<Range<usize>> {
    let mut groups = Vec::new();
    let mut start = 0;
    while start < stages.len() {
        let mut end = start + 1;
        if stages[start].stage.parallel {
            while end < stages.len() && stages[end].stage.parallel {
                end += 1;
            }
        }
        groups.push(start..end);
        start = end;
    }
    groups
}

// ── Pipeline ───────────────────────────────────────────────────

pub struct Pipeline {
    stages: Vec<PipelineStage>,
    config: PipelineConfig,
    source: Arc<dyn AdapterSource>,
    loaded: RwLock<Option<Arc<Vec<LoadedStage>>>>,
    init: tokio::sync::Mutex<()>,
    cache: Mutex<ResultCache>,
    metrics: Mutex<PipelineMetrics>,
}

impl Pipeline {
    pub fn new(stages: Vec<PipelineStage>, config: PipelineConfig, source: Arc<dyn AdapterSource>) -> Self {
        let cache = ResultCache::new(config.max_cache_size);
        Self {
            stages,
            config,
            source,
            loaded: RwLock::new(None),
            init: tokio::sync::Mutex::new(()),
            cache: Mutex::new(cache),
            metrics: Mutex::new(PipelineMetrics::default()),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    fn snapshot(&self) -> Option<Arc<Vec<LoadedStage>>> {
        self.loaded
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn loaded(&self) -> Result<Arc<Vec<LoadedStage>>, RuntimeError> {
        self.snapshot()
            .ok_or_else(|| RuntimeError::lifecycle("pipeline is not initialized"))
    }

    pub fn is_initialized(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Creates, initializes and loads one adapter per stage.
    ///
    /// If any stage fails, the stages already loaded are torn down and the
    /// pipeline stays uninitialized.
    pub async fn initialize(&self) -> Result<(), RuntimeError> {
        let _init = self.init.lock().await;
        if self.is_initialized() {
            return Ok(());
        }
        if self.stages.is_empty() {
            return Err(RuntimeError::validation("pipeline has no stages"));
        }

        let mut loaded = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            match self.start_stage(stage).await {
                Ok(ready) => loaded.push(ready),
                Err(err) => {
                    tracing::error!(stage = %stage.name, error = %err, "pipeline initialization failed");
                    teardown(&loaded).await;
                    return Err(err.context(format!("stage '{}'", stage.name)));
                }
            }
        }
        tracing::info!(stages = loaded.len(), "pipeline ready");
        *self.loaded.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(loaded));
        Ok(())
    }

    async fn start_stage(&self, stage: &PipelineStage) -> Result<LoadedStage, RuntimeError> {
        let bundle = &stage.model.bundle;
        let kind = match stage.model.runtime {
            Some(kind) => kind,
            None => self.source.detect(bundle)?,
        };
        let adapter = self.source.create(kind);
        let started = async {
            adapter.initialize().await?;
            adapter.load(bundle).await
        }
        .await;
        match started {
            Ok(handle) => {
                tracing::debug!(stage = %stage.name, runtime = %kind, "stage loaded");
                Ok(LoadedStage {
                    stage: stage.clone(),
                    adapter,
                    handle,
                })
            }
            Err(err) => {
                if let Err(e) = adapter.cleanup().await {
                    tracing::warn!(stage = %stage.name, error = %e, "cleanup after failed start");
                }
                Err(err)
            }
        }
    }

    /// Runs every stage on `input`.
    pub async fn process(&self, input: Value) -> Result<PipelineOutput, RuntimeError> {
        let stages = self.loaded()?;
        let started = Instant::now();
        let mut metadata = PipelineMetadata::default();
        let mut current = input;

        for group in groups(&stages) {
            let result = self.run_group(&stages[group], current).await?;
            for record in result.records {
                metadata.record(record.timing);
            }
            metadata.errors.extend(result.errors);
            current = result.next;
        }

        metadata.finalise(started.elapsed());
        lock(&self.metrics).absorb(&metadata);
        tracing::debug!(
            duration_ms = metadata.total_duration,
            cache_hits = metadata.cache_hits,
            errors = metadata.errors.len(),
            "pipeline call complete"
        );
        Ok(PipelineOutput {
            output: current,
            metadata,
        })
    }

    /// Runs the stages lazily, yielding a record as each one completes.
    ///
    /// The stream ends after the last stage or at the first error that the
    /// error-handling mode does not absorb.
    pub fn process_stream(&self, input: Value) -> impl Stream<Item = Result<StageRecord, RuntimeError>> + '_ {
        async_stream::try_stream! {
            let stages = self.loaded()?;
            let mut current = input;
            for group in groups(&stages) {
                let result = self.run_group(&stages[group], current).await?;
                for record in result.records {
                    yield record;
                }
                current = result.next;
            }
        }
    }

    /// Runs [`process`](Self::process) on every input concurrently. Results
    /// are in input order.
    pub async fn process_batch(&self, inputs: Vec<Value>) -> Vec<Result<PipelineOutput, RuntimeError>> {
        join_all(inputs.into_iter().map(|input| self.process(input))).await
    }

    async fn run_group(&self, group: &[LoadedStage], input: Value) -> Result<GroupResult, RuntimeError> {
        let fail_fast = self.config.error_handling == ErrorHandling::FailFast;

        if let [only] = group {
            if !only.stage.parallel {
                let outcome = self.run_stage(only, &input).await;
                return match outcome.result {
                    Ok(output) => Ok(GroupResult {
                        records: vec![StageRecord {
                            stage: only.stage.name.clone(),
                            output: output.clone(),
                            timing: outcome.timing,
                        }],
                        errors: Vec::new(),
                        next: output,
                    }),
                    Err(err) if fail_fast => Err(err.context(format!("stage '{}'", only.stage.name))),
                    Err(err) => Ok(GroupResult {
                        records: vec![StageRecord {
                            stage: only.stage.name.clone(),
                            output: Value::Null,
                            timing: outcome.timing,
                        }],
                        errors: vec![format!("{}: {err}", only.stage.name)],
                        next: Value::Null,
                    }),
                };
            }
        }

        let outcomes = join_all(group.iter().map(|loaded| self.run_stage(loaded, &input))).await;
        let mut merged = Map::new();
        let mut records = Vec::with_capacity(group.len());
        let mut errors = Vec::new();
        for (loaded, outcome) in group.iter().zip(outcomes) {
            let name = loaded.stage.name.clone();
            match outcome.result {
                Ok(output) => {
                    merged.insert(name.clone(), output.clone());
                    records.push(StageRecord {
                        stage: name,
                        output,
                        timing: outcome.timing,
                    });
                }
                Err(err) if fail_fast => return Err(err.context(format!("stage '{name}'"))),
                Err(err) => {
                    errors.push(format!("{name}: {err}"));
                    records.push(StageRecord {
                        stage: name,
                        output: Value::Null,
                        timing: outcome.timing,
                    });
                }
            }
        }
        Ok(GroupResult {
            records,
            errors,
            next: Value::Object(merged),
        })
    }

    async fn run_stage(&self, loaded: &LoadedStage, input: &Value) -> StageOutcome {
        let name = &loaded.stage.name;
        let started = Instant::now();
        let input = match &loaded.stage.transform {
            Some(transform) => transform(input.clone()),
            None => input.clone(),
        };
        let key = (self.config.cache_enabled && loaded.stage.cache).then(|| CacheKey::new(name, &input));

        if let Some(key) = &key {
            if let Some(hit) = lock(&self.cache).get(key) {
                tracing::debug!(stage = %name, "cache hit");
                return StageOutcome {
                    result: Ok(hit),
                    timing: StageTiming {
                        stage: name.clone(),
                        duration_ms: started.elapsed().as_secs_f64() * 1000.0,
                        cache_hit: true,
                        attempts: 0,
                        failed: false,
                    },
                };
            }
        }

        let max_attempts = match self.config.error_handling {
            ErrorHandling::Retry => 1 + self.config.retry_attempts,
            ErrorHandling::FailFast | ErrorHandling::Continue => 1,
        };
        let mut attempts = 0;
        let result = loop {
            attempts += 1;
            match loaded.adapter.predict(&loaded.handle, input.clone()).await {
                Ok(output) => break Ok(output),
                Err(err) if attempts < max_attempts => {
                    let delay = self.config.retry_delay(attempts);
                    tracing::warn!(
                        stage = %name,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "stage failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => break Err(err),
            }
        };

        if let (Ok(output), Some(key)) = (&result, key) {
            lock(&self.cache).insert(key, output.clone());
        }
        if let Err(err) = &result {
            tracing::error!(stage = %name, attempts, error = %err, "stage failed");
        }

        StageOutcome {
            timing: StageTiming {
                stage: name.clone(),
                duration_ms: started.elapsed().as_secs_f64() * 1000.0,
                cache_hit: false,
                attempts,
                failed: result.is_err(),
            },
            result,
        }
    }

    /// Totals across every call so far.
    pub fn metrics(&self) -> PipelineMetrics {
        lock(&self.metrics).clone()
    }

    pub fn cache_len(&self) -> usize {
        lock(&self.cache).len()
    }

    pub fn clear_cache(&self) {
        lock(&self.cache).clear();
    }

    /// Unloads every stage and tears down its adapter. Later calls fail
    /// with `lifecycle` until the pipeline is initialized again.
    pub async fn cleanup(&self) -> Result<(), RuntimeError> {
        let _init = self.init.lock().await;
        let taken = self
            .loaded
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(stages) = taken {
            teardown(&stages).await;
        }
        lock(&self.cache).clear();
        tracing::info!("pipeline cleaned up");
        Ok(())
    }
}

async fn teardown(stages: &[LoadedStage]) {
    for loaded in stages {
        if let Err(e) = loaded.adapter.unload(&loaded.handle).await {
            tracing::warn!(stage = %loaded.stage.name, error = %e, "unload failed");
        }
        if let Err(e) = loaded.adapter.cleanup().await {
            tracing::warn!(stage = %loaded.stage.name, error = %e, "adapter cleanup failed");
        }
    }
}
