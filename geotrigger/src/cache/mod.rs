//! Concurrent store of known trigger conditions.
//!
//! The cache is the sole owner of [`TriggerCondition`]s. Writers (the refresh
//! scheduler merging fetched conditions, the engine applying evictions) and
//! readers (snapshots taken for evaluation) are serialized by a single mutex,
//! so a reader never observes a half-applied merge or eviction.
//!
//! # Deduplication
//!
//! [`ConditionCache::upsert_if_absent`] is the only insertion path and it
//! refuses ids already present. Each entry also carries a "fired" marker so
//! the engine fires a condition at most once while it stays cached. Evicting
//! the entry drops the marker with it.
//!
//! # Example
//!
//! ```
//! use geotrigger::cache::ConditionCache;
//! use geotrigger::condition::TriggerCondition;
//! use geotrigger::geo::GeoPoint;
//!
//! let cache = ConditionCache::new();
//! let condition = TriggerCondition::new("a-1", GeoPoint::new(61.5, 23.79), "TRAFFIC_JAM");
//!
//! assert!(cache.upsert_if_absent(condition.clone()));
//! assert!(!cache.upsert_if_absent(condition));
//! assert_eq!(cache.len(), 1);
//! ```

use std::collections::HashSet;

use parking_lot::Mutex;

use crate::condition::{ConditionId, TriggerCondition};
use crate::geo::{haversine_distance, GeoPoint};

#[derive(Debug)]
struct CacheEntry {
    condition: TriggerCondition,
    fired: bool,
}

/// Internal state guarded by the cache mutex.
#[derive(Debug, Default)]
struct CacheInner {
    /// Entries in insertion order.
    entries: Vec<CacheEntry>,
    /// Ids of all entries, for O(1) dedup.
    ids: HashSet<ConditionId>,
}

impl CacheInner {
    fn position(&self, id: &ConditionId) -> Option<usize> {
        if !self.ids.contains(id) {
            return None;
        }
        self.entries.iter().position(|e| e.condition.id() == id)
    }
}

/// Thread-safe condition store.
#[derive(Debug, Default)]
pub struct ConditionCache {
    inner: Mutex<CacheInner>,
}

impl ConditionCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `condition` unless its id is already present.
    ///
    /// Returns `true` if the condition was inserted.
    pub fn upsert_if_absent(&self, condition: TriggerCondition) -> bool {
        let mut inner = self.inner.lock();
        if inner.ids.contains(condition.id()) {
            return false;
        }
        inner.ids.insert(condition.id().clone());
        inner.entries.push(CacheEntry {
            condition,
            fired: false,
        });
        true
    }

    /// Remove every condition for which `predicate(condition, location)` holds.
    ///
    /// Returns the ids removed, in cache order.
    pub fn evict_if<F>(&self, location: &GeoPoint, mut predicate: F) -> Vec<ConditionId>
    where
        F: FnMut(&TriggerCondition, &GeoPoint) -> bool,
    {
        let mut inner = self.inner.lock();
        let mut removed = Vec::new();
        inner.entries.retain(|entry| {
            if predicate(&entry.condition, location) {
                removed.push(entry.condition.id().clone());
                false
            } else {
                true
            }
        });
        for id in &removed {
            inner.ids.remove(id);
        }
        removed
    }

    /// Remove every condition anchored farther than `max_range_m` from `location`.
    pub fn evict_beyond(&self, location: &GeoPoint, max_range_m: f64) -> Vec<ConditionId> {
        self.evict_if(location, |condition, here| {
            haversine_distance(condition.anchor(), here) > max_range_m
        })
    }

    /// Copy of all conditions in insertion order.
    pub fn snapshot(&self) -> Vec<TriggerCondition> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|e| e.condition.clone())
            .collect()
    }

    /// Mark a cached condition as fired.
    ///
    /// Returns `true` only the first time for a present id; absent ids return
    /// `false`.
    pub fn mark_fired(&self, id: &ConditionId) -> bool {
        let mut inner = self.inner.lock();
        match inner.position(id) {
            Some(index) => {
                let entry = &mut inner.entries[index];
                !std::mem::replace(&mut entry.fired, true)
            }
            None => false,
        }
    }

    /// Whether a condition with `id` is cached.
    pub fn contains(&self, id: &ConditionId) -> bool {
        self.inner.lock().ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Drop all conditions.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.ids.clear();
    }
}
