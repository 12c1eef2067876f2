//! Location source fed directly by platform callbacks.

use parking_lot::Mutex;

use super::{Delivery, LocationError, LocationSample, LocationSink, LocationSource};

/// Source that forwards whatever is [`push`](PushLocationSource::push)ed to it.
#[derive(Debug, Default)]
pub struct PushLocationSource {
    sink: Mutex<Option<LocationSink>>,
}

impl PushLocationSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward a fix to the subscriber.
    ///
    /// Returns [`Delivery::Closed`] when nobody is subscribed.
    pub fn push(&self, sample: LocationSample) -> Delivery {
        match self.sink.lock().as_ref() {
            Some(sink) => sink.deliver(sample),
            None => Delivery::Closed,
        }
    }

    /// Whether a subscriber is attached.
    pub fn is_subscribed(&self) -> bool {
        self.sink.lock().as_ref().is_some_and(|s| !s.is_closed())
    }
}

impl LocationSource for PushLocationSource {
    fn subscribe(&self, sink: LocationSink) -> Result<(), LocationError> {
        let mut current = self.sink.lock();
        if current.as_ref().is_some_and(|s| !s.is_closed()) {
            return Err(LocationError::AlreadySubscribed);
        }
        *current = Some(sink);
        Ok(())
    }

    fn unsubscribe(&self) {
        self.sink.lock().take();
    }
}
