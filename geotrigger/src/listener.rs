//! Callbacks from the engine to its owner.

use std::collections::BTreeSet;

use crate::condition::{Category, TriggerCondition};
use crate::trigger::TriggerQueueEntry;

/// Receives engine events.
///
/// Called from the evaluation loop and from flush tasks; implementations
/// should return quickly.
pub trait EngineListener: Send + Sync {
    /// Categories in range and ahead after each evaluated sample.
    fn on_evaluated(&self, in_range: &BTreeSet<Category>, ahead: &BTreeSet<Category>);

    /// A condition came into range for the first time since it was cached.
    fn on_fired(&self, _condition: &TriggerCondition) {}

    /// A batch of queued triggers was flushed.
    fn on_flushed(&self, _category: &Category, _batch: &[TriggerQueueEntry]) {}
}

/// Listener that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl EngineListener for NoopListener {
    fn on_evaluated(&self, _in_range: &BTreeSet<Category>, _ahead: &BTreeSet<Category>) {}
}
