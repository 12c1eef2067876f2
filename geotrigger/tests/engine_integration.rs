//! Integration tests for the proximity engine.
//!
//! These tests drive the engine through its public API only:
//! - sample classification (in range, ahead, evicted)
//! - refresh single-flight behaviour
//! - actuator-gated trigger queues, end to end through a location source
//! - stale actuator results after a restart
//!
//! Run with: `cargo test --test engine_integration`

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use geotrigger::condition::{
    Category, ConditionId, ConditionRecord, Term, TermRecord, TriggerCondition,
    TERM_LOCATION_POINT, TERM_TEXT_DESCRIPTION,
};
use geotrigger::config::EngineConfig;
use geotrigger::geo::{destination, haversine_distance, GeoPoint};
use geotrigger::listener::EngineListener;
use geotrigger::location::{Delivery, LocationSample, LocationSource, PushLocationSource};
use geotrigger::matcher::TermEvaluator;
use geotrigger::refresh::{FetchError, FetchRequest, Fetcher, KickOutcome};
use geotrigger::trigger::{
    Actuator, ActuatorCompletion, ActuatorError, ActuatorOutput, ActuatorRequest, FlushError,
    Flusher, TriggerQueueEntry,
};
use geotrigger::{BoxFuture, Engine};

// ============================================================================
// Helper Functions
// ============================================================================

const ANCHOR: GeoPoint = GeoPoint::new(61.50, 23.79);

/// Fetcher returning the same records every time, counting calls.
struct StaticFetcher {
    records: Vec<ConditionRecord>,
    calls: AtomicUsize,
}

impl StaticFetcher {
    fn new(records: Vec<ConditionRecord>) -> Arc<Self> {
        Arc::new(Self {
            records,
            calls: AtomicUsize::new(0),
        })
    }
}

impl Fetcher for StaticFetcher {
    fn fetch(&self, _request: FetchRequest) -> BoxFuture<'_, Result<Vec<ConditionRecord>, FetchError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let records = self.records.clone();
        Box::pin(async move {
            // Stay in flight across a few polls so concurrent kicks overlap.
            for _ in 0..3 {
                tokio::task::yield_now().await;
            }
            Ok(records)
        })
    }
}

#[derive(Default)]
struct Recorder {
    fired: Mutex<Vec<ConditionId>>,
    flushed: Mutex<Vec<(Category, Vec<TriggerQueueEntry>)>>,
}

impl EngineListener for Recorder {
    fn on_evaluated(&self, _in_range: &BTreeSet<Category>, _ahead: &BTreeSet<Category>) {}

    fn on_fired(&self, condition: &TriggerCondition) {
        self.fired.lock().unwrap().push(condition.id().clone());
    }

    fn on_flushed(&self, category: &Category, batch: &[TriggerQueueEntry]) {
        self.flushed
            .lock()
            .unwrap()
            .push((category.clone(), batch.to_vec()));
    }
}

/// Actuator that completes every request from a separate OS thread.
struct ThreadedCamera;

impl Actuator for ThreadedCamera {
    fn request(
        &self,
        _request: ActuatorRequest,
        completion: ActuatorCompletion,
    ) -> Result<(), ActuatorError> {
        std::thread::spawn(move || {
            completion.complete(Ok(ActuatorOutput::new("image/jpeg", vec![0xff, 0xd8, 0xff])));
        });
        Ok(())
    }
}

/// Actuator that keeps completions for the test to resolve later.
#[derive(Default)]
struct HeldCamera {
    held: Mutex<Vec<ActuatorCompletion>>,
}

impl Actuator for HeldCamera {
    fn request(
        &self,
        _request: ActuatorRequest,
        completion: ActuatorCompletion,
    ) -> Result<(), ActuatorError> {
        self.held.lock().unwrap().push(completion);
        Ok(())
    }
}

#[derive(Default)]
struct CollectingFlusher {
    batches: Mutex<Vec<Vec<TriggerQueueEntry>>>,
}

impl Flusher for CollectingFlusher {
    fn flush<'a>(
        &'a self,
        _category: &'a Category,
        batch: &'a [TriggerQueueEntry],
    ) -> BoxFuture<'a, Result<(), FlushError>> {
        self.batches.lock().unwrap().push(batch.to_vec());
        Box::pin(async { Ok(()) })
    }
}

/// Term evaluator that rejects every term and counts how often it was asked.
#[derive(Default)]
struct CountingTerms {
    calls: AtomicUsize,
}

impl TermEvaluator for CountingTerms {
    fn evaluate(&self, _term: &Term, _sample: &LocationSample) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        false
    }
}

fn record(id: &str, at: GeoPoint, category: &str) -> ConditionRecord {
    ConditionRecord {
        id: Some(id.into()),
        latitude: Some(at.latitude),
        longitude: Some(at.longitude),
        category: Some(category.into()),
        ..Default::default()
    }
}

fn config() -> EngineConfig {
    EngineConfig::default()
        .with_max_retrieval_range(1000.0)
        .with_self_origin_suppression(false)
}

/// Point `distance_m` south of the anchor.
fn south_of_anchor(distance_m: f64) -> GeoPoint {
    destination(&ANCHOR, 180.0, distance_m)
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

async fn loaded_engine(records: Vec<ConditionRecord>) -> Engine {
    let engine = Engine::builder(
        config(),
        StaticFetcher::new(records),
        Arc::new(PushLocationSource::new()),
    )
    .build()
    .unwrap();
    engine.refresh_now().await.unwrap();
    engine
}

// ============================================================================
// Classification
// ============================================================================

#[tokio::test]
async fn test_stationary_sample_near_anchor_is_in_range() {
    let engine = loaded_engine(vec![record("a", ANCHOR, "ANIMAL")]).await;

    let sample = LocationSample::at(south_of_anchor(150.0)).with_speed(0.0);
    let result = engine.process_sample(&sample);

    assert_eq!(result.in_range.len(), 1);
    assert!(result.ahead.is_empty());
    assert!(result.evicted.is_empty());
}

#[tokio::test]
async fn test_fast_sample_heading_to_anchor_sees_it_ahead() {
    let engine = loaded_engine(vec![record("a", ANCHOR, "ANIMAL")]).await;

    let sample = LocationSample::at(south_of_anchor(900.0))
        .with_speed(20.0)
        .with_bearing(0.0);
    let result = engine.process_sample(&sample);

    assert!(result.in_range.is_empty());
    assert_eq!(result.ahead.len(), 1);
    assert!(result.evicted.is_empty());
    assert!(engine.cache().contains(&ConditionId::new("a")));
}

#[tokio::test]
async fn test_sample_beyond_range_evicts() {
    let engine = loaded_engine(vec![record("a", ANCHOR, "ANIMAL")]).await;

    let result = engine.process_sample(&LocationSample::at(south_of_anchor(1200.0)));

    assert_eq!(result.evicted, vec![ConditionId::new("a")]);
    assert!(result.in_range.is_empty());
    assert!(result.ahead.is_empty());
    assert!(engine.cache().is_empty());
}

#[tokio::test]
async fn test_cache_never_holds_conditions_beyond_range_after_evaluation() {
    let records = (0..12)
        .map(|i| {
            record(
                &format!("c-{}", i),
                destination(&ANCHOR, 30.0 * i as f64, 250.0 * i as f64),
                "ANIMAL",
            )
        })
        .collect();
    let engine = loaded_engine(records).await;
    let max_range = engine.config().max_retrieval_range;

    for step in 0..8 {
        let here = destination(&ANCHOR, 90.0, 400.0 * step as f64);
        engine.process_sample(&LocationSample::at(here));

        for condition in engine.cache().snapshot() {
            let distance = haversine_distance(&here, condition.anchor());
            assert!(
                distance <= max_range,
                "{} cached at {:.0} m after step {}",
                condition.id(),
                distance,
                step
            );
        }
    }
}

#[tokio::test]
async fn test_terms_stop_at_first_failing_term() {
    let terms = Arc::new(CountingTerms::default());
    let mut with_terms = record("t", ANCHOR, "PHOTO");
    with_terms.terms = vec![
        TermRecord {
            key: TERM_LOCATION_POINT.into(),
            value: "61.5,23.79".into(),
        },
        TermRecord {
            key: TERM_TEXT_DESCRIPTION.into(),
            value: "old mill".into(),
        },
        TermRecord {
            key: TERM_TEXT_DESCRIPTION.into(),
            value: "north side".into(),
        },
    ];

    let engine = Engine::builder(
        config(),
        StaticFetcher::new(vec![with_terms]),
        Arc::new(PushLocationSource::new()),
    )
    .with_term_evaluator(Arc::clone(&terms) as Arc<dyn TermEvaluator>)
    .build()
    .unwrap();
    engine.refresh_now().await.unwrap();

    let result = engine.process_sample(&LocationSample::at(ANCHOR).with_speed(0.0));

    assert!(result.in_range.is_empty());
    assert_eq!(terms.calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Refresh
// ============================================================================

#[tokio::test]
async fn test_concurrent_refreshes_fetch_once() {
    let fetcher = StaticFetcher::new(vec![record("a", ANCHOR, "ANIMAL")]);
    let engine = Engine::builder(
        config(),
        Arc::clone(&fetcher) as Arc<dyn Fetcher>,
        Arc::new(PushLocationSource::new()),
    )
    .build()
    .unwrap();

    let outcomes = futures::future::join_all((0..5).map(|_| engine.refresh_now())).await;

    let merged = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(KickOutcome::Merged(_))))
        .count();
    let skipped = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(KickOutcome::Skipped)))
        .count();
    assert_eq!(merged, 1);
    assert_eq!(skipped, 4);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine.cache().len(), 1);
    assert_eq!(engine.stats().fetches_skipped, 4);
}

#[tokio::test]
async fn test_refetch_does_not_refire() {
    let engine = loaded_engine(vec![record("a", ANCHOR, "ANIMAL")]).await;
    let sample = LocationSample::at(ANCHOR).with_speed(0.0);

    engine.process_sample(&sample);
    engine.refresh_now().await.unwrap();
    engine.process_sample(&sample);

    assert_eq!(engine.stats().conditions_fired, 1);
}

// ============================================================================
// Trigger queues
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fired_photo_condition_is_flushed_with_output() {
    let source = Arc::new(PushLocationSource::new());
    let flusher = Arc::new(CollectingFlusher::default());
    let recorder = Arc::new(Recorder::default());

    let engine = Engine::builder(
        config(),
        StaticFetcher::new(vec![
            record("photo-1", ANCHOR, "PHOTO"),
            record("animal-1", ANCHOR, "ANIMAL"),
        ]),
        Arc::clone(&source) as Arc<dyn LocationSource>,
    )
    .with_listener(Arc::clone(&recorder) as Arc<dyn EngineListener>)
    .with_flusher(Arc::clone(&flusher) as Arc<dyn Flusher>)
    .with_actuator("PHOTO", Arc::new(ThreadedCamera))
    .build()
    .unwrap();

    engine.refresh_now().await.unwrap();
    engine.start().unwrap();
    assert_eq!(
        source.push(LocationSample::at(ANCHOR).with_speed(0.0)),
        Delivery::Accepted
    );

    assert!(wait_until(|| !recorder.flushed.lock().unwrap().is_empty()).await);

    let batches = flusher.batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);
    let entry = &batches[0][0];
    assert_eq!(entry.condition.id().as_str(), "photo-1");
    assert_eq!(
        entry.payload.output.as_ref().unwrap().content_type,
        "image/jpeg"
    );
    drop(batches);

    assert_eq!(recorder.fired.lock().unwrap().len(), 2);
    let queue = engine.queue(&Category::new("PHOTO")).unwrap();
    assert!(queue.is_empty());
    assert!(!queue.is_actuator_pending());
    assert_eq!(engine.stats().entries_flushed, 1);

    engine.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_actuator_result_from_previous_run_is_ignored() {
    let source = Arc::new(PushLocationSource::new());
    let flusher = Arc::new(CollectingFlusher::default());
    let camera = Arc::new(HeldCamera::default());

    let engine = Engine::builder(
        config(),
        StaticFetcher::new(vec![record("photo-1", ANCHOR, "PHOTO")]),
        Arc::clone(&source) as Arc<dyn LocationSource>,
    )
    .with_flusher(Arc::clone(&flusher) as Arc<dyn Flusher>)
    .with_actuator("PHOTO", Arc::clone(&camera) as Arc<dyn Actuator>)
    .build()
    .unwrap();

    engine.refresh_now().await.unwrap();
    engine.start().unwrap();
    source.push(LocationSample::at(ANCHOR).with_speed(0.0));
    assert!(wait_until(|| !camera.held.lock().unwrap().is_empty()).await);

    let first_generation = engine.generation();
    engine.stop();
    engine.start().unwrap();
    assert!(engine.generation() > first_generation);

    let stale = camera.held.lock().unwrap().pop().unwrap();
    assert_eq!(stale.generation(), first_generation);
    stale.complete(Ok(ActuatorOutput::new("image/jpeg", vec![1])));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(flusher.batches.lock().unwrap().is_empty());
    let queue = engine.queue(&Category::new("PHOTO")).unwrap();
    assert_eq!(queue.len(), 1);
    assert!(!queue.is_actuator_pending());

    // A result for the current run still flushes the parked entry.
    engine
        .on_actuator_result(
            &Category::new("PHOTO"),
            Ok(ActuatorOutput::new("image/jpeg", vec![2])),
        )
        .await
        .unwrap();
    assert_eq!(flusher.batches.lock().unwrap().len(), 1);
    assert!(queue.is_empty());

    engine.stop();
}
