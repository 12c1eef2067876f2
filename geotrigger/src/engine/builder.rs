//! Engine construction.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Engine, EngineCore};
use crate::cache::ConditionCache;
use crate::condition::Category;
use crate::config::{ConfigError, EngineConfig};
use crate::error::EngineError;
use crate::generation::GenerationCounter;
use crate::listener::{EngineListener, NoopListener};
use crate::location::{LastKnownLocation, LocationSource};
use crate::matcher::{MatchEvaluator, TermEvaluator};
use crate::refresh::{Fetcher, RefreshScheduler};
use crate::stats::EngineStats;
use crate::trigger::{Actuator, Flusher, TriggerQueue};

/// Builder for [`Engine`].
///
/// The category dispatch table is fixed once [`build`](Self::build) returns.
pub struct EngineBuilder {
    config: EngineConfig,
    fetcher: Arc<dyn Fetcher>,
    source: Arc<dyn LocationSource>,
    listener: Arc<dyn EngineListener>,
    flusher: Option<Arc<dyn Flusher>>,
    actuators: Vec<(Category, Arc<dyn Actuator>)>,
    term_evaluator: Option<Arc<dyn TermEvaluator>>,
}

impl EngineBuilder {
    pub fn new(
        config: EngineConfig,
        fetcher: Arc<dyn Fetcher>,
        source: Arc<dyn LocationSource>,
    ) -> Self {
        Self {
            config,
            fetcher,
            source,
            listener: Arc::new(NoopListener),
            flusher: None,
            actuators: Vec::new(),
            term_evaluator: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn EngineListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Destination for completed triggers. Required when actuators are registered.
    pub fn with_flusher(mut self, flusher: Arc<dyn Flusher>) -> Self {
        self.flusher = Some(flusher);
        self
    }

    /// Route fired conditions of `category` through a queue driving `actuator`.
    ///
    /// Registering the same category twice keeps the last actuator.
    pub fn with_actuator(mut self, category: impl Into<Category>, actuator: Arc<dyn Actuator>) -> Self {
        let category = category.into();
        self.actuators.retain(|(c, _)| *c != category);
        self.actuators.push((category, actuator));
        self
    }

    /// Replace the built-in term semantics.
    pub fn with_term_evaluator(mut self, evaluator: Arc<dyn TermEvaluator>) -> Self {
        self.term_evaluator = Some(evaluator);
        self
    }

    pub fn build(self) -> Result<Engine, EngineError> {
        self.config.validate()?;

        let stats = Arc::new(EngineStats::new());
        let cache = Arc::new(ConditionCache::new());
        let location = LastKnownLocation::new();
        let generation = GenerationCounter::new();

        let mut evaluator = MatchEvaluator::new(&self.config);
        if let Some(terms) = self.term_evaluator {
            evaluator = evaluator.with_term_evaluator(terms);
        }

        let scheduler = RefreshScheduler::with_parts(
            self.fetcher,
            Arc::clone(&cache),
            &self.config,
            Arc::clone(&stats),
            location.clone(),
        );

        let mut queues = HashMap::new();
        if !self.actuators.is_empty() {
            let flusher = self.flusher.ok_or_else(|| {
                ConfigError::Invalid("actuators registered without a flusher".to_string())
            })?;
            for (category, actuator) in self.actuators {
                let queue = TriggerQueue::new(
                    category.clone(),
                    actuator,
                    Arc::clone(&flusher),
                    generation.clone(),
                )
                .with_stats(Arc::clone(&stats))
                .with_listener(Arc::clone(&self.listener));
                queues.insert(category, Arc::new(queue));
            }
        }

        Ok(Engine {
            core: Arc::new(EngineCore {
                config: self.config,
                cache,
                evaluator,
                scheduler,
                source: self.source,
                listener: self.listener,
                queues,
                generation,
                stats,
                location,
                run: Mutex::new(None),
                scheduler_started: AtomicBool::new(false),
            }),
        })
    }
}
