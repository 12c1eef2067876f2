//! Engine counters.
//!
//! Lock-free counters updated from the evaluation loop, the refresh
//! scheduler and the trigger queues.
//!
//! ```text
//! Engine / Scheduler / Queues ───► EngineStats ───► StatsSnapshot ───► CLI, logs
//!                                  (atomics)        (point-in-time copy)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Atomic counters shared by all engine components.
#[derive(Debug, Default)]
pub struct EngineStats {
    samples_evaluated: AtomicU64,
    samples_dropped: Arc<AtomicU64>,
    conditions_fired: AtomicU64,
    conditions_evicted: AtomicU64,
    fetches_succeeded: AtomicU64,
    fetches_failed: AtomicU64,
    fetches_skipped: AtomicU64,
    conditions_merged: AtomicU64,
    conditions_malformed: AtomicU64,
    conditions_suppressed: AtomicU64,
    actuator_failures: AtomicU64,
    entries_flushed: AtomicU64,
    flushes_failed: AtomicU64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_evaluated(&self) {
        self.samples_evaluated.fetch_add(1, Ordering::Relaxed);
    }

    /// Counter shared with the location sink.
    pub(crate) fn drop_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.samples_dropped)
    }

    pub fn condition_fired(&self) {
        self.conditions_fired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn conditions_evicted(&self, count: usize) {
        self.conditions_evicted
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn fetch_succeeded(&self, merged: usize, malformed: usize, suppressed: usize) {
        self.fetches_succeeded.fetch_add(1, Ordering::Relaxed);
        self.conditions_merged
            .fetch_add(merged as u64, Ordering::Relaxed);
        self.conditions_malformed
            .fetch_add(malformed as u64, Ordering::Relaxed);
        self.conditions_suppressed
            .fetch_add(suppressed as u64, Ordering::Relaxed);
    }

    pub fn fetch_failed(&self) {
        self.fetches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fetch_skipped(&self) {
        self.fetches_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn actuator_failed(&self) {
        self.actuator_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn entries_flushed(&self, count: usize) {
        self.entries_flushed
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn flush_failed(&self) {
        self.flushes_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            samples_evaluated: self.samples_evaluated.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            conditions_fired: self.conditions_fired.load(Ordering::Relaxed),
            conditions_evicted: self.conditions_evicted.load(Ordering::Relaxed),
            fetches_succeeded: self.fetches_succeeded.load(Ordering::Relaxed),
            fetches_failed: self.fetches_failed.load(Ordering::Relaxed),
            fetches_skipped: self.fetches_skipped.load(Ordering::Relaxed),
            conditions_merged: self.conditions_merged.load(Ordering::Relaxed),
            conditions_malformed: self.conditions_malformed.load(Ordering::Relaxed),
            conditions_suppressed: self.conditions_suppressed.load(Ordering::Relaxed),
            actuator_failures: self.actuator_failures.load(Ordering::Relaxed),
            entries_flushed: self.entries_flushed.load(Ordering::Relaxed),
            flushes_failed: self.flushes_failed.load(Ordering::Relaxed),
        }
    }
}

/// Copy of [`EngineStats`] at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub samples_evaluated: u64,
    pub samples_dropped: u64,
    pub conditions_fired: u64,
    pub conditions_evicted: u64,
    pub fetches_succeeded: u64,
    pub fetches_failed: u64,
    pub fetches_skipped: u64,
    pub conditions_merged: u64,
    pub conditions_malformed: u64,
    pub conditions_suppressed: u64,
    pub actuator_failures: u64,
    pub entries_flushed: u64,
    pub flushes_failed: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "samples {} (dropped {}), fired {}, evicted {}, fetches {}/{} failed/{} skipped, \
             merged {}, flushed {}",
            self.samples_evaluated,
            self.samples_dropped,
            self.conditions_fired,
            self.conditions_evicted,
            self.fetches_succeeded,
            self.fetches_failed,
            self.fetches_skipped,
            self.conditions_merged,
            self.entries_flushed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = EngineStats::new();
        stats.sample_evaluated();
        stats.sample_evaluated();
        stats.fetch_succeeded(3, 1, 2);
        stats.fetch_failed();
        stats.conditions_evicted(4);
        stats.drop_counter().fetch_add(5, Ordering::Relaxed);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.samples_evaluated, 2);
        assert_eq!(snapshot.fetches_succeeded, 1);
        assert_eq!(snapshot.conditions_merged, 3);
        assert_eq!(snapshot.conditions_malformed, 1);
        assert_eq!(snapshot.conditions_suppressed, 2);
        assert_eq!(snapshot.fetches_failed, 1);
        assert_eq!(snapshot.conditions_evicted, 4);
        assert_eq!(snapshot.samples_dropped, 5);
    }

    #[test]
    fn test_snapshot_display() {
        let snapshot = StatsSnapshot {
            samples_evaluated: 10,
            conditions_fired: 2,
            ..Default::default()
        };
        let text = snapshot.to_string();
        assert!(text.starts_with("samples 10 (dropped 0), fired 2"));
    }
}
