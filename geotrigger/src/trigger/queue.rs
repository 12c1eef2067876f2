//! Per-category trigger queue.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::{
    Actuator, ActuatorError, ActuatorOutput, ActuatorRequest, Flusher, TriggerPayload,
    TriggerQueueEntry,
};
use crate::condition::{Category, ConditionId, TriggerCondition};
use crate::generation::GenerationCounter;
use crate::listener::{EngineListener, NoopListener};
use crate::location::LocationSample;
use crate::stats::EngineStats;

#[derive(Debug, Default)]
struct QueueState {
    /// Entries in fire order, at most one per condition id.
    entries: Vec<TriggerQueueEntry>,
    /// An actuator request is outstanding.
    actuator_pending: bool,
}

impl QueueState {
    fn contains(&self, id: &ConditionId) -> bool {
        self.entries.iter().any(|e| e.condition.id() == id)
    }
}

/// Handle an [`Actuator`] uses to report the outcome of a request.
///
/// Results are ignored if the engine was restarted since the request.
#[derive(Debug)]
pub struct ActuatorCompletion {
    queue: Weak<TriggerQueue>,
    generation: u64,
    runtime: Option<Handle>,
}

impl ActuatorCompletion {
    /// Generation the request belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver the actuator result. Safe to call from any thread.
    pub fn complete(self, result: Result<ActuatorOutput, ActuatorError>) {
        let Some(queue) = self.queue.upgrade() else {
            debug!("Trigger queue gone, dropping actuator result");
            return;
        };
        let runtime = match self.runtime.or_else(|| Handle::try_current().ok()) {
            Some(runtime) => runtime,
            None => {
                warn!(
                    category = %queue.category,
                    "No runtime to deliver actuator result, dropping it"
                );
                queue.state.lock().actuator_pending = false;
                return;
            }
        };
        let generation = self.generation;
        runtime.spawn(async move {
            queue.complete_for(generation, result).await;
        });
    }
}

/// Queue of fired conditions of one actuator-backed category.
pub struct TriggerQueue {
    category: Category,
    actuator: Arc<dyn Actuator>,
    flusher: Arc<dyn Flusher>,
    generation: GenerationCounter,
    stats: Arc<EngineStats>,
    listener: Arc<dyn EngineListener>,
    state: Mutex<QueueState>,
}

impl std::fmt::Debug for TriggerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerQueue")
            .field("category", &self.category)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl TriggerQueue {
    pub fn new(
        category: impl Into<Category>,
        actuator: Arc<dyn Actuator>,
        flusher: Arc<dyn Flusher>,
        generation: GenerationCounter,
    ) -> Self {
        Self {
            category: category.into(),
            actuator,
            flusher,
            generation,
            stats: Arc::new(EngineStats::new()),
            listener: Arc::new(NoopListener),
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn with_stats(mut self, stats: Arc<EngineStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn EngineListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn category(&self) -> &Category {
        &self.category
    }

    /// Queue `condition` unless it is already queued, then ask the actuator
    /// for output if no request is outstanding.
    pub fn on_fire(self: &Arc<Self>, condition: TriggerCondition, sample: &LocationSample) {
        let request = {
            let mut state = self.state.lock();
            if !state.contains(condition.id()) {
                debug!(
                    category = %self.category,
                    condition = %condition.id(),
                    "Queueing trigger"
                );
                state.entries.push(TriggerQueueEntry {
                    condition,
                    payload: TriggerPayload::from_sample(sample),
                });
            }
            self.take_request(&mut state, sample)
        };
        if let Some(request) = request {
            self.dispatch(request);
        }
    }

    /// Deliver an actuator result for the current generation.
    pub async fn on_actuator_result(&self, result: Result<ActuatorOutput, ActuatorError>) {
        self.complete_for(self.generation.current(), result).await;
    }

    /// Drop the queued entry for `id`. Returns whether one was queued.
    pub fn cancel(&self, id: &ConditionId) -> bool {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|e| e.condition.id() != id);
        before != state.entries.len()
    }

    /// Drop all queued entries. Returns how many were dropped.
    pub fn cancel_all(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.entries.len();
        state.entries.clear();
        dropped
    }

    /// Forget an outstanding actuator request, e.g. after a restart made
    /// its completion stale.
    pub fn reset_actuator(&self) {
        self.state.lock().actuator_pending = false;
    }

    /// Snapshot of the queued entries.
    pub fn pending(&self) -> Vec<TriggerQueueEntry> {
        self.state.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn is_actuator_pending(&self) -> bool {
        self.state.lock().actuator_pending
    }

    fn take_request(&self, state: &mut QueueState, sample: &LocationSample) -> Option<ActuatorRequest> {
        if state.entries.is_empty() || state.actuator_pending {
            return None;
        }
        state.actuator_pending = true;
        Some(ActuatorRequest {
            category: self.category.clone(),
            location: *sample.point(),
            pending: state
                .entries
                .iter()
                .map(|e| e.condition.id().clone())
                .collect(),
        })
    }

    fn dispatch(self: &Arc<Self>, request: ActuatorRequest) {
        let completion = ActuatorCompletion {
            queue: Arc::downgrade(self),
            generation: self.generation.current(),
            runtime: Handle::try_current().ok(),
        };
        let pending = request.pending.len();
        match self.actuator.request(request, completion) {
            Ok(()) => debug!(category = %self.category, pending, "Actuator requested"),
            Err(e) => {
                warn!(category = %self.category, error = %e, "Actuator request refused");
                self.stats.actuator_failed();
                self.state.lock().actuator_pending = false;
            }
        }
    }

    async fn complete_for(&self, generation: u64, result: Result<ActuatorOutput, ActuatorError>) {
        if !self.generation.is_current(generation) {
            debug!(
                category = %self.category,
                generation,
                "Ignoring actuator result from previous run"
            );
            return;
        }

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                warn!(category = %self.category, error = %e, "Actuation failed, keeping entries queued");
                self.stats.actuator_failed();
                self.state.lock().actuator_pending = false;
                return;
            }
        };

        let batch = {
            let mut state = self.state.lock();
            state.actuator_pending = false;
            for entry in &mut state.entries {
                // Entries put back after a failed flush keep their original output.
                if entry.payload.output.is_none() {
                    entry.payload.output = Some(output.clone());
                }
            }
            std::mem::take(&mut state.entries)
        };
        if batch.is_empty() {
            return;
        }

        match self.flusher.flush(&self.category, &batch).await {
            Ok(()) => {
                info!(category = %self.category, entries = batch.len(), "Flushed triggers");
                self.stats.entries_flushed(batch.len());
                self.listener.on_flushed(&self.category, &batch);
            }
            Err(e) => {
                warn!(
                    category = %self.category,
                    entries = batch.len(),
                    error = %e,
                    "Flush failed, re-queueing"
                );
                self.stats.flush_failed();
                let mut state = self.state.lock();
                state
                    .entries
                    .retain(|queued| !batch.iter().any(|b| b.condition.id() == queued.condition.id()));
                let newer = std::mem::replace(&mut state.entries, batch);
                state.entries.extend(newer);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;
    use crate::trigger::FlushError;
    use crate::BoxFuture;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct StubActuator {
        requests: Mutex<Vec<ActuatorRequest>>,
        completions: Mutex<Vec<ActuatorCompletion>>,
        refuse: AtomicBool,
    }

    impl StubActuator {
        fn take_completion(&self) -> ActuatorCompletion {
            self.completions.lock().pop().expect("no outstanding request")
        }
    }

    impl Actuator for StubActuator {
        fn request(
            &self,
            request: ActuatorRequest,
            completion: ActuatorCompletion,
        ) -> Result<(), ActuatorError> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(ActuatorError::Unavailable("camera in use".into()));
            }
            self.requests.lock().push(request);
            self.completions.lock().push(completion);
            Ok(())
        }
    }

    #[derive(Default)]
    struct StubFlusher {
        batches: Mutex<Vec<Vec<TriggerQueueEntry>>>,
        fail: AtomicBool,
    }

    impl Flusher for StubFlusher {
        fn flush<'a>(
            &'a self,
            _category: &'a Category,
            batch: &'a [TriggerQueueEntry],
        ) -> BoxFuture<'a, Result<(), FlushError>> {
            Box::pin(async move {
                if self.fail.load(Ordering::SeqCst) {
                    return Err(FlushError::Transport("offline".into()));
                }
                self.batches.lock().push(batch.to_vec());
                Ok(())
            })
        }
    }

    struct Fixture {
        queue: Arc<TriggerQueue>,
        actuator: Arc<StubActuator>,
        flusher: Arc<StubFlusher>,
        generation: GenerationCounter,
    }

    fn fixture() -> Fixture {
        let actuator = Arc::new(StubActuator::default());
        let flusher = Arc::new(StubFlusher::default());
        let generation = GenerationCounter::new();
        generation.advance();
        let queue = Arc::new(TriggerQueue::new(
            "PHOTO",
            Arc::clone(&actuator) as Arc<dyn Actuator>,
            Arc::clone(&flusher) as Arc<dyn Flusher>,
            generation.clone(),
        ));
        Fixture {
            queue,
            actuator,
            flusher,
            generation,
        }
    }

    fn condition(id: &str) -> TriggerCondition {
        TriggerCondition::new(id, GeoPoint::new(61.5, 23.79), "PHOTO")
    }

    fn sample() -> LocationSample {
        LocationSample::new(61.5, 23.79).with_speed(4.0)
    }

    fn photo() -> ActuatorOutput {
        ActuatorOutput::new("image/jpeg", vec![1, 2, 3])
    }

    #[tokio::test]
    async fn test_first_fire_requests_actuator_once() {
        let f = fixture();
        f.queue.on_fire(condition("a"), &sample());
        f.queue.on_fire(condition("b"), &sample());
        f.queue.on_fire(condition("a"), &sample());

        assert_eq!(f.queue.len(), 2);
        assert!(f.queue.is_actuator_pending());
        let requests = f.actuator.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].pending, vec![ConditionId::new("a")]);
        assert_eq!(requests[0].category, Category::new("PHOTO"));
    }

    #[tokio::test]
    async fn test_success_attaches_output_and_flushes_all() {
        let f = fixture();
        f.queue.on_fire(condition("a"), &sample());
        f.queue.on_fire(condition("b"), &sample());

        f.queue.on_actuator_result(Ok(photo())).await;

        assert!(f.queue.is_empty());
        assert!(!f.queue.is_actuator_pending());
        let batches = f.flusher.batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert!(batches[0]
            .iter()
            .all(|e| e.payload.output.as_ref().map(|o| o.data.as_slice()) == Some(&[1u8, 2, 3][..])));
        assert_eq!(batches[0][0].payload.speed, Some(4.0));
    }

    #[tokio::test]
    async fn test_actuator_failure_keeps_entries() {
        let f = fixture();
        f.queue.on_fire(condition("a"), &sample());

        f.queue
            .on_actuator_result(Err(ActuatorError::Failed("lens cap".into())))
            .await;

        assert_eq!(f.queue.len(), 1);
        assert!(!f.queue.is_actuator_pending());
        assert!(f.flusher.batches.lock().is_empty());

        // Next fire asks again.
        f.queue.on_fire(condition("b"), &sample());
        assert_eq!(f.actuator.requests.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_refused_request_clears_pending() {
        let f = fixture();
        f.actuator.refuse.store(true, Ordering::SeqCst);
        f.queue.on_fire(condition("a"), &sample());

        assert_eq!(f.queue.len(), 1);
        assert!(!f.queue.is_actuator_pending());
    }

    #[tokio::test]
    async fn test_flush_failure_requeues_with_output() {
        let f = fixture();
        f.queue.on_fire(condition("a"), &sample());
        f.flusher.fail.store(true, Ordering::SeqCst);

        let first = ActuatorOutput::new("image/jpeg", vec![1]);
        f.queue.on_actuator_result(Ok(first.clone())).await;

        let pending = f.queue.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].payload.output.as_ref(), Some(&first));

        // The next successful actuation flushes it, keeping the original output.
        f.flusher.fail.store(false, Ordering::SeqCst);
        f.queue.on_fire(condition("b"), &sample());
        f.queue
            .on_actuator_result(Ok(ActuatorOutput::new("image/jpeg", vec![2])))
            .await;

        let batches = f.flusher.batches.lock();
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[0][0].payload.output.as_ref(), Some(&first));
        assert_eq!(batches[0][1].payload.output.as_ref().unwrap().data, vec![2]);
    }

    #[tokio::test]
    async fn test_stale_completion_ignored() {
        let f = fixture();
        f.queue.on_fire(condition("a"), &sample());
        let completion = f.actuator.take_completion();

        f.generation.advance();
        completion.complete(Ok(photo()));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(f.queue.len(), 1);
        assert!(f.flusher.batches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_completion_from_foreign_thread() {
        let f = fixture();
        f.queue.on_fire(condition("a"), &sample());
        let completion = f.actuator.take_completion();

        std::thread::spawn(move || completion.complete(Ok(photo())))
            .join()
            .unwrap();

        for _ in 0..100 {
            if !f.flusher.batches.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(f.flusher.batches.lock().len(), 1);
        assert!(f.queue.is_empty());
    }

    #[tokio::test]
    async fn test_cancel() {
        let f = fixture();
        f.queue.on_fire(condition("a"), &sample());
        f.queue.on_fire(condition("b"), &sample());
        f.queue.on_fire(condition("c"), &sample());

        assert!(f.queue.cancel(&ConditionId::new("b")));
        assert!(!f.queue.cancel(&ConditionId::new("b")));
        assert_eq!(f.queue.len(), 2);

        assert_eq!(f.queue.cancel_all(), 2);
        assert!(f.queue.is_empty());

        // Output arriving for a cancelled batch flushes nothing.
        f.queue.on_actuator_result(Ok(photo())).await;
        assert!(f.flusher.batches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_reset_actuator_allows_new_request() {
        let f = fixture();
        f.queue.on_fire(condition("a"), &sample());
        f.generation.advance();
        f.queue.reset_actuator();

        f.queue.on_fire(condition("b"), &sample());
        assert_eq!(f.actuator.requests.lock().len(), 2);
    }
}
