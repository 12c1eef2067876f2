//! Classification of cached conditions against a location sample.
//!
//! For each condition the evaluator decides one of four outcomes:
//!
//! ```text
//!                       distance > max range ──► evicted
//!                                │ no
//!        ┌── has terms ──────────┴──────── no terms ──┐
//!        ▼                                            ▼
//!  all terms hold?                        distance < radius/threshold?
//!        │ yes ──► in range                           │ yes ──► in range
//!        │ no                                         │ no
//!        └──────────────┬─────────────────────────────┘
//!                       ▼
//!        bearing unknown, or anchor inside bearing cone ──► ahead
//!                       │ otherwise
//!                       ▼
//!                    (nothing)
//! ```
//!
//! Evaluation is read-only. Evictions are reported in [`MatchResult::evicted`]
//! and applied to the cache by the engine.

mod terms;

pub use terms::{DefaultTermEvaluator, TermEvaluator};

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::condition::{Category, ConditionId, TriggerCondition};
use crate::config::EngineConfig;
use crate::geo::{bearing_to, haversine_distance, in_bearing_cone, ThresholdPolicy};
use crate::location::LocationSample;

/// Outcome of evaluating one sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchResult {
    /// Conditions whose trigger criteria hold right now.
    pub in_range: Vec<TriggerCondition>,
    /// Conditions within range but not yet triggered, roughly in the direction of travel.
    pub ahead: Vec<TriggerCondition>,
    /// Conditions beyond the maximum retrieval range.
    pub evicted: Vec<ConditionId>,
}

impl MatchResult {
    /// Distinct categories of the in-range conditions.
    pub fn in_range_categories(&self) -> BTreeSet<Category> {
        self.in_range.iter().map(|c| c.category().clone()).collect()
    }

    /// Distinct categories of the conditions ahead.
    pub fn ahead_categories(&self) -> BTreeSet<Category> {
        self.ahead.iter().map(|c| c.category().clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.in_range.is_empty() && self.ahead.is_empty() && self.evicted.is_empty()
    }
}

/// Stateless classifier of conditions against a sample.
#[derive(Clone)]
pub struct MatchEvaluator {
    max_retrieval_range: f64,
    bearing_cone_half_width: f64,
    thresholds: ThresholdPolicy,
    terms: Arc<dyn TermEvaluator>,
}

impl std::fmt::Debug for MatchEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchEvaluator")
            .field("max_retrieval_range", &self.max_retrieval_range)
            .field("bearing_cone_half_width", &self.bearing_cone_half_width)
            .field("thresholds", &self.thresholds)
            .finish_non_exhaustive()
    }
}

impl MatchEvaluator {
    /// Evaluator using the built-in term semantics.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_retrieval_range: config.max_retrieval_range,
            bearing_cone_half_width: config.bearing_cone_half_width,
            thresholds: config.threshold_policy(),
            terms: Arc::new(DefaultTermEvaluator),
        }
    }

    /// Replace the term evaluator.
    pub fn with_term_evaluator(mut self, terms: Arc<dyn TermEvaluator>) -> Self {
        self.terms = terms;
        self
    }

    pub fn max_retrieval_range(&self) -> f64 {
        self.max_retrieval_range
    }

    /// Classify `conditions` against `sample`.
    pub fn evaluate(&self, sample: &LocationSample, conditions: &[TriggerCondition]) -> MatchResult {
        let mut result = MatchResult::default();
        let here = sample.point();
        let speed = sample.speed_or_zero();
        let bearing = sample.bearing();

        for condition in conditions {
            let distance = haversine_distance(here, condition.anchor());
            if !distance.is_finite() {
                continue;
            }
            if distance > self.max_retrieval_range {
                result.evicted.push(condition.id().clone());
                continue;
            }

            let fired = if condition.has_terms() {
                condition
                    .terms()
                    .iter()
                    .all(|term| self.terms.evaluate(term, sample))
            } else {
                let radius = condition
                    .radius()
                    .unwrap_or_else(|| self.thresholds.distance_threshold(speed));
                distance < radius
            };

            if fired {
                result.in_range.push(condition.clone());
                continue;
            }

            let is_ahead = match bearing {
                Some(current) => in_bearing_cone(
                    current,
                    bearing_to(here, condition.anchor()),
                    self.bearing_cone_half_width,
                ),
                None => true,
            };
            if is_ahead {
                result.ahead.push(condition.clone());
            }
        }

        debug!(
            conditions = conditions.len(),
            in_range = result.in_range.len(),
            ahead = result.ahead.len(),
            evicted = result.evicted.len(),
            "Evaluated sample"
        );
        result
    }
}
