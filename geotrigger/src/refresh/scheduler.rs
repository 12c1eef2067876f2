//! Refresh scheduler.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{FetchError, FetchRequest, Fetcher};
use crate::cache::ConditionCache;
use crate::condition::TriggerCondition;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::generation::GenerationCounter;
use crate::location::LastKnownLocation;
use crate::stats::EngineStats;

/// What a merged fetch did to the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Records returned by the fetcher.
    pub fetched: usize,
    /// New conditions inserted.
    pub merged: usize,
    /// Already cached.
    pub duplicates: usize,
    /// Dropped as malformed.
    pub malformed: usize,
    /// Dropped because the local user created them.
    pub suppressed: usize,
}

/// Result of a [`RefreshScheduler::kick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KickOutcome {
    /// Another fetch was already in flight.
    Skipped,
    /// Fetch completed and was merged.
    Merged(MergeSummary),
    /// Fetch completed after a restart and was discarded.
    Stale,
}

/// Claim on the single-flight slot.
///
/// The slot holds `generation + 1` of the fetch in flight, or zero when idle.
/// A fetch left over from an earlier generation does not block the current
/// one. The claim is released when the fetch ends, however it ends, unless a
/// newer generation has taken the slot over in the meantime.
struct FlightGuard<'a> {
    slot: &'a AtomicU64,
    tag: u64,
}

impl<'a> FlightGuard<'a> {
    fn acquire(slot: &'a AtomicU64, generation: u64) -> Option<Self> {
        let tag = generation + 1;
        let mut held = slot.load(Ordering::Acquire);
        loop {
            if held >= tag {
                return None;
            }
            match slot.compare_exchange(held, tag, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return Some(Self { slot, tag }),
                Err(actual) => held = actual,
            }
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let _ = self
            .slot
            .compare_exchange(self.tag, 0, Ordering::AcqRel, Ordering::Acquire);
    }
}

struct SchedulerShared {
    fetcher: Arc<dyn Fetcher>,
    cache: Arc<ConditionCache>,
    interval: Duration,
    time_filtered: bool,
    suppressed_identity: Option<String>,
    generation: GenerationCounter,
    stats: Arc<EngineStats>,
    location: LastKnownLocation,
    flight: AtomicU64,
    last_success: Mutex<Option<DateTime<Utc>>>,
    running: Mutex<Option<CancellationToken>>,
}

/// Keeps the [`ConditionCache`] fed from a [`Fetcher`].
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RefreshScheduler {
    shared: Arc<SchedulerShared>,
}

impl std::fmt::Debug for RefreshScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshScheduler")
            .field("interval", &self.shared.interval)
            .field("fetching", &self.is_fetching())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl RefreshScheduler {
    pub fn new(fetcher: Arc<dyn Fetcher>, cache: Arc<ConditionCache>, config: &EngineConfig) -> Self {
        Self::with_parts(
            fetcher,
            cache,
            config,
            Arc::new(EngineStats::new()),
            LastKnownLocation::new(),
        )
    }

    /// Scheduler reporting into `stats` and reading the user position from `location`.
    pub fn with_parts(
        fetcher: Arc<dyn Fetcher>,
        cache: Arc<ConditionCache>,
        config: &EngineConfig,
        stats: Arc<EngineStats>,
        location: LastKnownLocation,
    ) -> Self {
        Self {
            shared: Arc::new(SchedulerShared {
                fetcher,
                cache,
                interval: config.refresh_interval,
                time_filtered: config.time_filtered_refresh,
                suppressed_identity: config.suppressed_identity().map(str::to_string),
                generation: GenerationCounter::new(),
                stats,
                location,
                flight: AtomicU64::new(0),
                last_success: Mutex::new(None),
                running: Mutex::new(None),
            }),
        }
    }

    /// Fetch now unless a fetch of the current run is already in flight.
    ///
    /// Transient failures and configuration errors are both returned; the
    /// cache is left untouched in either case.
    pub async fn kick(&self) -> Result<KickOutcome, FetchError> {
        let shared = &self.shared;
        let generation = shared.generation.current();
        let Some(_flight) = FlightGuard::acquire(&shared.flight, generation) else {
            shared.stats.fetch_skipped();
            debug!("Fetch already in flight, skipping");
            return Ok(KickOutcome::Skipped);
        };

        let started = Utc::now();
        let request = FetchRequest {
            since: if shared.time_filtered {
                *shared.last_success.lock()
            } else {
                None
            },
            around: shared.location.point(),
        };
        debug!(since = ?request.since, around = ?request.around, "Fetching conditions");

        let records = match shared.fetcher.fetch(request).await {
            Ok(records) => records,
            Err(e) => {
                shared.stats.fetch_failed();
                return Err(e);
            }
        };

        if !shared.generation.is_current(generation) {
            debug!(records = records.len(), "Discarding fetch from previous run");
            return Ok(KickOutcome::Stale);
        }

        let mut summary = MergeSummary {
            fetched: records.len(),
            ..Default::default()
        };
        for record in records {
            let condition = match TriggerCondition::try_from(record) {
                Ok(condition) => condition,
                Err(e) => {
                    warn!(error = %e, "Dropping malformed condition");
                    summary.malformed += 1;
                    continue;
                }
            };
            if let (Some(me), Some(owner)) =
                (shared.suppressed_identity.as_deref(), condition.owner())
            {
                if me == owner {
                    summary.suppressed += 1;
                    continue;
                }
            }
            if shared.cache.upsert_if_absent(condition) {
                summary.merged += 1;
            } else {
                summary.duplicates += 1;
            }
        }

        *shared.last_success.lock() = Some(started);
        shared
            .stats
            .fetch_succeeded(summary.merged, summary.malformed, summary.suppressed);
        debug!(
            fetched = summary.fetched,
            merged = summary.merged,
            duplicates = summary.duplicates,
            malformed = summary.malformed,
            suppressed = summary.suppressed,
            "Merged conditions"
        );
        Ok(KickOutcome::Merged(summary))
    }

    /// Begin a new run: fetch immediately, then every interval.
    ///
    /// Restarting cancels the previous timer and discards fetches still in
    /// flight from the previous run.
    pub fn start(&self) -> Result<(), EngineError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| EngineError::NoRuntime(e.to_string()))?;
        self.begin_generation();
        self.spawn_timer(handle);
        Ok(())
    }

    /// Start a new generation without starting the timer.
    ///
    /// Cancels the timer, forgets the last successful fetch and makes every
    /// fetch still in flight stale. Returns the new generation.
    pub fn begin_generation(&self) -> u64 {
        let mut running = self.shared.running.lock();
        if let Some(previous) = running.take() {
            previous.cancel();
        }
        *self.shared.last_success.lock() = None;
        self.shared.generation.advance()
    }

    /// Start the timer for the current generation.
    pub(crate) fn start_timer(&self) -> Result<(), EngineError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| EngineError::NoRuntime(e.to_string()))?;
        self.spawn_timer(handle);
        Ok(())
    }

    fn spawn_timer(&self, handle: tokio::runtime::Handle) {
        let mut running = self.shared.running.lock();
        if let Some(previous) = running.take() {
            previous.cancel();
        }
        let cancel = CancellationToken::new();
        *running = Some(cancel.clone());

        info!(
            generation = self.shared.generation.current(),
            interval_secs = self.shared.interval.as_secs(),
            "Refresh scheduler started"
        );
        let scheduler = self.clone();
        handle.spawn(async move { scheduler.run(cancel).await });
    }

    /// Cancel the timer. A fetch already in flight may still merge.
    pub fn stop(&self) {
        if let Some(cancel) = self.shared.running.lock().take() {
            cancel.cancel();
            info!("Refresh scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared
            .running
            .lock()
            .as_ref()
            .is_some_and(|t| !t.is_cancelled())
    }

    pub fn is_fetching(&self) -> bool {
        self.shared.flight.load(Ordering::Acquire) != 0
    }

    /// Start time of the last fetch that merged.
    pub fn last_successful_fetch(&self) -> Option<DateTime<Utc>> {
        *self.shared.last_success.lock()
    }

    async fn run(self, cancel: CancellationToken) {
        loop {
            match self.kick().await {
                Ok(KickOutcome::Merged(summary)) if summary.merged > 0 => {
                    info!(merged = summary.merged, "New conditions cached");
                }
                Ok(_) => {}
                Err(e) if e.is_transient() => warn!(error = %e, "Fetch failed"),
                Err(e) => error!(error = %e, "Fetch failed, check configuration"),
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.shared.interval) => {}
            }
        }
        debug!("Refresh loop exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{ConditionId, ConditionRecord};
    use crate::config::ConfigError;
    use crate::geo::GeoPoint;
    use crate::location::LocationSample;
    use crate::BoxFuture;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use tokio::sync::Notify;

    fn record(id: &str) -> ConditionRecord {
        ConditionRecord {
            id: Some(id.to_string()),
            latitude: Some(61.5),
            longitude: Some(23.79),
            category: Some("TRAFFIC_JAM".to_string()),
            ..Default::default()
        }
    }

    #[derive(Default)]
    struct StubFetcher {
        records: Mutex<Vec<ConditionRecord>>,
        requests: Mutex<Vec<FetchRequest>>,
        calls: AtomicUsize,
        fail: AtomicBool,
        bad_config: AtomicBool,
        gate: Option<Arc<Notify>>,
    }

    impl StubFetcher {
        fn returning(records: Vec<ConditionRecord>) -> Self {
            Self {
                records: Mutex::new(records),
                ..Default::default()
            }
        }

        fn gated(records: Vec<ConditionRecord>, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::returning(records)
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Fetcher for StubFetcher {
        fn fetch(
            &self,
            request: FetchRequest,
        ) -> BoxFuture<'_, Result<Vec<ConditionRecord>, FetchError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.requests.lock().push(request);
                if let Some(gate) = &self.gate {
                    gate.notified().await;
                }
                if self.bad_config.load(Ordering::SeqCst) {
                    return Err(ConfigError::Invalid("no url".into()).into());
                }
                if self.fail.load(Ordering::SeqCst) {
                    return Err(FetchError::Transport("connection refused".into()));
                }
                Ok(self.records.lock().clone())
            })
        }
    }

    fn config() -> EngineConfig {
        EngineConfig::default()
            .with_self_origin_suppression(true)
            .with_local_identity("me")
    }

    fn scheduler(fetcher: Arc<StubFetcher>) -> (RefreshScheduler, Arc<ConditionCache>) {
        let cache = Arc::new(ConditionCache::new());
        (
            RefreshScheduler::new(fetcher, Arc::clone(&cache), &config()),
            cache,
        )
    }

    #[tokio::test]
    async fn test_kick_merges_and_dedups() {
        let fetcher = Arc::new(StubFetcher::returning(vec![
            record("a"),
            record("b"),
            record("a"),
        ]));
        let (scheduler, cache) = scheduler(Arc::clone(&fetcher));

        let outcome = scheduler.kick().await.unwrap();

        let KickOutcome::Merged(summary) = outcome else {
            panic!("expected merge, got {:?}", outcome);
        };
        assert_eq!(summary.fetched, 3);
        assert_eq!(summary.merged, 2);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(cache.len(), 2);
        assert!(scheduler.last_successful_fetch().is_some());
        assert!(!scheduler.is_fetching());
    }

    #[tokio::test]
    async fn test_malformed_records_dropped() {
        let mut no_category = record("c");
        no_category.category = None;
        let fetcher = Arc::new(StubFetcher::returning(vec![
            record("a"),
            ConditionRecord::default(),
            no_category,
        ]));
        let (scheduler, cache) = scheduler(fetcher);

        let KickOutcome::Merged(summary) = scheduler.kick().await.unwrap() else {
            panic!("expected merge");
        };
        assert_eq!(summary.merged, 1);
        assert_eq!(summary.malformed, 2);
        assert!(cache.contains(&ConditionId::new("a")));
    }

    #[tokio::test]
    async fn test_self_origin_suppressed() {
        let mut own = record("mine");
        own.owner = Some("me".into());
        let mut other = record("theirs");
        other.owner = Some("someone".into());
        let fetcher = Arc::new(StubFetcher::returning(vec![own, other]));
        let (scheduler, cache) = scheduler(fetcher);

        let KickOutcome::Merged(summary) = scheduler.kick().await.unwrap() else {
            panic!("expected merge");
        };
        assert_eq!(summary.suppressed, 1);
        assert!(!cache.contains(&ConditionId::new("mine")));
        assert!(cache.contains(&ConditionId::new("theirs")));
    }

    #[tokio::test]
    async fn test_suppression_disabled_keeps_own() {
        let mut own = record("mine");
        own.owner = Some("me".into());
        let fetcher = Arc::new(StubFetcher::returning(vec![own]));
        let cache = Arc::new(ConditionCache::new());
        let scheduler = RefreshScheduler::new(
            fetcher,
            Arc::clone(&cache),
            &config().with_self_origin_suppression(false),
        );

        scheduler.kick().await.unwrap();
        assert!(cache.contains(&ConditionId::new("mine")));
    }

    #[tokio::test]
    async fn test_failure_leaves_cache_untouched() {
        let fetcher = Arc::new(StubFetcher::returning(vec![record("a")]));
        fetcher.fail.store(true, Ordering::SeqCst);
        let (scheduler, cache) = scheduler(Arc::clone(&fetcher));

        let err = scheduler.kick().await.unwrap_err();
        assert!(err.is_transient());
        assert!(cache.is_empty());
        assert!(scheduler.last_successful_fetch().is_none());
        assert!(!scheduler.is_fetching(), "flag released after failure");

        fetcher.fail.store(false, Ordering::SeqCst);
        assert!(matches!(
            scheduler.kick().await,
            Ok(KickOutcome::Merged(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_configuration_returned() {
        let fetcher = Arc::new(StubFetcher::default());
        fetcher.bad_config.store(true, Ordering::SeqCst);
        let (scheduler, _cache) = scheduler(fetcher);

        let err = scheduler.kick().await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn test_since_follows_last_success() {
        let fetcher = Arc::new(StubFetcher::returning(vec![]));
        let (scheduler, _cache) = scheduler(Arc::clone(&fetcher));

        scheduler.kick().await.unwrap();
        scheduler.kick().await.unwrap();

        let requests = fetcher.requests.lock().clone();
        assert_eq!(requests[0].since, None);
        assert_eq!(requests[1].since, scheduler.last_successful_fetch());
        assert!(requests[1].since.is_some());
    }

    #[tokio::test]
    async fn test_since_omitted_when_not_time_filtered() {
        let fetcher = Arc::new(StubFetcher::returning(vec![]));
        let scheduler = RefreshScheduler::new(
            Arc::clone(&fetcher) as Arc<dyn Fetcher>,
            Arc::new(ConditionCache::new()),
            &config().with_time_filtered_refresh(false),
        );

        scheduler.kick().await.unwrap();
        scheduler.kick().await.unwrap();

        assert!(fetcher.requests.lock().iter().all(|r| r.since.is_none()));
    }

    #[tokio::test]
    async fn test_request_carries_last_location() {
        let fetcher = Arc::new(StubFetcher::returning(vec![]));
        let location = LastKnownLocation::new();
        location.set(LocationSample::new(61.5, 23.79));
        let scheduler = RefreshScheduler::with_parts(
            Arc::clone(&fetcher) as Arc<dyn Fetcher>,
            Arc::new(ConditionCache::new()),
            &config(),
            Arc::new(EngineStats::new()),
            location,
        );

        scheduler.kick().await.unwrap();
        assert_eq!(
            fetcher.requests.lock()[0].around,
            Some(GeoPoint::new(61.5, 23.79))
        );
    }

    #[tokio::test]
    async fn test_concurrent_kicks_single_flight() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(StubFetcher::gated(vec![record("a")], Arc::clone(&gate)));
        let (scheduler, cache) = scheduler(Arc::clone(&fetcher));

        let first = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.kick().await }
        });
        while fetcher.calls() == 0 {
            tokio::task::yield_now().await;
        }

        let others = futures::future::join_all((0..8).map(|_| scheduler.kick())).await;
        assert!(others
            .iter()
            .all(|o| matches!(o, Ok(KickOutcome::Skipped))));

        gate.notify_one();
        let outcome = first.await.unwrap().unwrap();
        assert!(matches!(outcome, KickOutcome::Merged(_)));
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_generation_discarded() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(StubFetcher::gated(vec![record("a")], Arc::clone(&gate)));
        let (scheduler, cache) = scheduler(Arc::clone(&fetcher));

        let in_flight = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.kick().await }
        });
        while fetcher.calls() == 0 {
            tokio::task::yield_now().await;
        }

        scheduler.shared.generation.advance();
        gate.notify_one();

        assert!(matches!(
            in_flight.await.unwrap(),
            Ok(KickOutcome::Stale)
        ));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_fetches_immediately_despite_old_fetch_in_flight() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(StubFetcher::gated(vec![record("a")], Arc::clone(&gate)));
        let (scheduler, cache) = scheduler(Arc::clone(&fetcher));

        scheduler.start().unwrap();
        while fetcher.calls() == 0 {
            tokio::task::yield_now().await;
        }

        scheduler.stop();
        scheduler.start().unwrap();
        while fetcher.calls() < 2 {
            tokio::task::yield_now().await;
        }
        assert!(scheduler.is_fetching());

        gate.notify_one();
        gate.notify_one();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(fetcher.calls(), 2);
        assert_eq!(cache.len(), 1);
        assert!(scheduler.last_successful_fetch().is_some());
        assert!(!scheduler.is_fetching());
    }

    #[tokio::test]
    async fn test_old_fetch_does_not_release_newer_flight() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(StubFetcher::gated(vec![record("a")], Arc::clone(&gate)));
        let (scheduler, _cache) = scheduler(Arc::clone(&fetcher));

        let old = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.kick().await }
        });
        while fetcher.calls() == 0 {
            tokio::task::yield_now().await;
        }

        scheduler.begin_generation();
        let new = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.kick().await }
        });
        while fetcher.calls() < 2 {
            tokio::task::yield_now().await;
        }

        // Waiters are woken in arrival order, so this releases the old fetch.
        gate.notify_one();
        assert!(matches!(old.await.unwrap(), Ok(KickOutcome::Stale)));
        assert!(scheduler.is_fetching(), "newer fetch still holds the flight");
        assert!(matches!(scheduler.kick().await, Ok(KickOutcome::Skipped)));

        gate.notify_one();
        assert!(matches!(new.await.unwrap(), Ok(KickOutcome::Merged(_))));
        assert!(!scheduler.is_fetching());
    }

    #[test]
    fn test_begin_generation_forgets_last_success() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let (scheduler, _cache) = scheduler(Arc::new(StubFetcher::returning(vec![])));
        runtime.block_on(scheduler.kick()).unwrap();
        assert!(scheduler.last_successful_fetch().is_some());

        let before = scheduler.shared.generation.current();
        assert_eq!(scheduler.begin_generation(), before + 1);
        assert!(scheduler.last_successful_fetch().is_none());
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_fetches_periodically_until_stopped() {
        let fetcher = Arc::new(StubFetcher::returning(vec![record("a")]));
        let (scheduler, cache) = scheduler(Arc::clone(&fetcher));

        scheduler.start().unwrap();
        assert!(scheduler.is_running());

        // Immediate fetch, then one per 30 s interval.
        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(fetcher.calls(), 3);
        assert_eq!(cache.len(), 1);

        scheduler.stop();
        assert!(!scheduler.is_running());
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fetcher.calls(), 3);
    }

    #[test]
    fn test_start_requires_runtime() {
        let (scheduler, _cache) = scheduler(Arc::new(StubFetcher::default()));
        assert!(matches!(scheduler.start(), Err(EngineError::NoRuntime(_))));
    }
}
