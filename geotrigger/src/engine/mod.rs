//! The proximity engine.
//!
//! Wires the location source, condition cache, refresh scheduler, match
//! evaluator and trigger queues together.
//!
//! # Architecture
//!
//! ```text
//!                    ┌──────────────────────── Engine ─────────────────────────┐
//! LocationSource ──► │ [bounded channel] ──► evaluation loop                   │
//!                    │                          │ snapshot        ▲ evictions  │
//!                    │                          ▼                 │            │
//!                    │                   MatchEvaluator ──► ConditionCache ◄───┼── RefreshScheduler ◄── Fetcher
//!                    │                          │                              │
//!                    │              fired, by category                         │
//!                    │                          ▼                              │
//!                    │                    TriggerQueue ──► Actuator / Flusher  │
//!                    └─────────────────────────────────────────────────────────┘
//!                                               │
//!                                         EngineListener
//! ```
//!
//! # Lifecycle
//!
//! `start()` begins a new generation for the engine and the refresh scheduler,
//! subscribes to the location source and spawns the evaluation loop. The first
//! sample starts the refresh timer.
//! `stop()` unsubscribes and cancels the loop and the scheduler. Results of
//! asynchronous work from an earlier generation are discarded.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use geotrigger::engine::EngineBuilder;
//! use geotrigger::location::{LocationSample, PushLocationSource};
//!
//! let source = Arc::new(PushLocationSource::new());
//! let engine = EngineBuilder::new(config, fetcher, source.clone())
//!     .with_listener(listener)
//!     .build()?;
//!
//! engine.start()?;
//! source.push(LocationSample::new(61.50, 23.79).with_speed(12.0));
//! // ...
//! engine.stop();
//! ```

mod builder;

pub use builder::EngineBuilder;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::cache::ConditionCache;
use crate::condition::{Category, TriggerCondition};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::generation::GenerationCounter;
use crate::listener::EngineListener;
use crate::location::{LastKnownLocation, LocationSample, LocationSink, LocationSource};
use crate::matcher::{MatchEvaluator, MatchResult};
use crate::refresh::{FetchError, KickOutcome, RefreshScheduler};
use crate::stats::{EngineStats, StatsSnapshot};
use crate::trigger::{ActuatorError, ActuatorOutput, TriggerQueue};

#[derive(Debug)]
struct RunState {
    cancel: CancellationToken,
    generation: u64,
}

pub(crate) struct EngineCore {
    config: EngineConfig,
    cache: Arc<ConditionCache>,
    evaluator: MatchEvaluator,
    scheduler: RefreshScheduler,
    source: Arc<dyn LocationSource>,
    listener: Arc<dyn EngineListener>,
    queues: HashMap<Category, Arc<TriggerQueue>>,
    generation: GenerationCounter,
    stats: Arc<EngineStats>,
    location: LastKnownLocation,
    run: Mutex<Option<RunState>>,
    scheduler_started: AtomicBool,
}

impl EngineCore {
    fn process_sample(&self, sample: &LocationSample) -> MatchResult {
        self.location.set(*sample);
        self.stats.sample_evaluated();

        let snapshot = self.cache.snapshot();
        let result = self.evaluator.evaluate(sample, &snapshot);

        if !result.evicted.is_empty() {
            let removed = self
                .cache
                .evict_if(sample.point(), |condition, _| {
                    result.evicted.contains(condition.id())
                });
            self.stats.conditions_evicted(removed.len());
            debug!(evicted = removed.len(), "Evicted out-of-range conditions");
        }

        self.listener
            .on_evaluated(&result.in_range_categories(), &result.ahead_categories());

        for condition in &result.in_range {
            if self.cache.mark_fired(condition.id()) {
                self.fire(condition, sample);
            }
        }
        result
    }

    fn fire(&self, condition: &TriggerCondition, sample: &LocationSample) {
        self.stats.condition_fired();
        info!(
            condition = %condition.id(),
            category = %condition.category(),
            "Condition in range"
        );
        self.listener.on_fired(condition);
        if let Some(queue) = self.queues.get(condition.category()) {
            queue.on_fire(condition.clone(), sample);
        }
    }

    async fn evaluation_loop(
        self: Arc<Self>,
        mut samples: mpsc::Receiver<LocationSample>,
        cancel: CancellationToken,
    ) {
        loop {
            let sample = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                sample = samples.recv() => match sample {
                    Some(sample) => sample,
                    None => break,
                },
            };

            if !cancel.is_cancelled() && !self.scheduler_started.swap(true, Ordering::AcqRel) {
                if let Err(e) = self.scheduler.start_timer() {
                    error!(error = %e, "Failed to start refresh scheduler");
                }
            }
            self.process_sample(&sample);
        }
        debug!("Evaluation loop exited");
    }
}

/// Proximity trigger engine.
///
/// Owned by its caller; dropping it stops it.
pub struct Engine {
    core: Arc<EngineCore>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("running", &self.is_running())
            .field("conditions", &self.core.cache.len())
            .field("categories", &self.core.queues.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn builder(
        config: EngineConfig,
        fetcher: Arc<dyn crate::refresh::Fetcher>,
        source: Arc<dyn LocationSource>,
    ) -> EngineBuilder {
        EngineBuilder::new(config, fetcher, source)
    }

    /// Start listening for location samples.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<(), EngineError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| EngineError::NoRuntime(e.to_string()))?;

        let core = &self.core;
        let mut run = core.run.lock();
        if run.is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        let generation = core.generation.advance();
        let refresh_generation = core.scheduler.begin_generation();
        for queue in core.queues.values() {
            queue.reset_actuator();
        }
        core.scheduler_started.store(false, Ordering::Release);

        let (sink, samples) = LocationSink::channel_counting(
            core.config.location_channel_capacity,
            core.stats.drop_counter(),
        );
        core.source.subscribe(sink)?;

        let cancel = CancellationToken::new();
        handle.spawn(Arc::clone(core).evaluation_loop(samples, cancel.clone()));
        *run = Some(RunState { cancel, generation });

        info!(
            generation,
            refresh_generation,
            conditions = core.cache.len(),
            actuators = core.queues.len(),
            "Engine started"
        );
        Ok(())
    }

    /// Stop listening and cancel background work. Idempotent.
    pub fn stop(&self) {
        let Some(run) = self.core.run.lock().take() else {
            return;
        };
        self.core.source.unsubscribe();
        run.cancel.cancel();
        self.core.scheduler.stop();
        info!(generation = run.generation, "Engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.core.run.lock().is_some()
    }

    /// Current run generation.
    pub fn generation(&self) -> u64 {
        self.core.generation.current()
    }

    /// Evaluate one sample synchronously, bypassing the location channel.
    pub fn process_sample(&self, sample: &LocationSample) -> MatchResult {
        self.core.process_sample(sample)
    }

    /// Deliver an actuator result to the queue of `category`.
    pub async fn on_actuator_result(
        &self,
        category: &Category,
        result: Result<ActuatorOutput, ActuatorError>,
    ) -> Result<(), EngineError> {
        let queue = self
            .core
            .queues
            .get(category)
            .ok_or_else(|| EngineError::UnknownCategory(category.to_string()))?;
        queue.on_actuator_result(result).await;
        Ok(())
    }

    /// Fetch now, outside the periodic schedule.
    pub async fn refresh_now(&self) -> Result<KickOutcome, FetchError> {
        self.core.scheduler.kick().await
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats.snapshot()
    }

    pub fn last_location(&self) -> Option<LocationSample> {
        self.core.location.get()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    pub fn cache(&self) -> &Arc<ConditionCache> {
        &self.core.cache
    }

    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.core.scheduler
    }

    pub fn queue(&self, category: &Category) -> Option<&Arc<TriggerQueue>> {
        self.core.queues.get(category)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}
