//! Location samples and the channel end that carries them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::geo::GeoPoint;

/// One location fix from a platform provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationSample {
    point: GeoPoint,
    /// Ground speed in m/s, if the provider reported one.
    speed: Option<f64>,
    /// Direction of travel in degrees, if known.
    bearing: Option<f64>,
    timestamp: Instant,
}

impl LocationSample {
    /// Sample at `latitude`/`longitude` with unknown speed and bearing.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self::at(GeoPoint::new(latitude, longitude))
    }

    /// Sample at `point` with unknown speed and bearing.
    pub fn at(point: GeoPoint) -> Self {
        Self {
            point,
            speed: None,
            bearing: None,
            timestamp: Instant::now(),
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_bearing(mut self, bearing: f64) -> Self {
        self.bearing = Some(bearing);
        self
    }

    pub fn with_timestamp(mut self, timestamp: Instant) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn point(&self) -> &GeoPoint {
        &self.point
    }

    pub fn speed(&self) -> Option<f64> {
        self.speed
    }

    /// Speed in m/s, treating unknown or non-finite values as stationary.
    pub fn speed_or_zero(&self) -> f64 {
        self.speed.filter(|s| s.is_finite()).unwrap_or(0.0)
    }

    /// Bearing in degrees, `None` if unknown or non-finite.
    pub fn bearing(&self) -> Option<f64> {
        self.bearing.filter(|b| b.is_finite())
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }
}

/// Most recent sample seen by the engine, shared with the refresh scheduler.
#[derive(Debug, Clone, Default)]
pub struct LastKnownLocation {
    sample: Arc<Mutex<Option<LocationSample>>>,
}

impl LastKnownLocation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, sample: LocationSample) {
        *self.sample.lock() = Some(sample);
    }

    pub fn get(&self) -> Option<LocationSample> {
        *self.sample.lock()
    }

    pub fn point(&self) -> Option<GeoPoint> {
        self.get().map(|s| *s.point())
    }
}

/// Result of handing a sample to a [`LocationSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for evaluation.
    Accepted,
    /// Channel full; the sample was discarded.
    Dropped,
    /// The engine stopped listening.
    Closed,
}

/// Producer end of the engine's bounded location channel.
///
/// Never blocks: when the evaluator falls behind, new samples are dropped.
#[derive(Debug, Clone)]
pub struct LocationSink {
    tx: mpsc::Sender<LocationSample>,
    dropped: Arc<AtomicU64>,
}

impl LocationSink {
    /// Create a sink and its receiving end with room for `capacity` samples.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<LocationSample>) {
        Self::channel_counting(capacity, Arc::new(AtomicU64::new(0)))
    }

    /// Like [`channel`](Self::channel), counting drops into `dropped`.
    pub(crate) fn channel_counting(
        capacity: usize,
        dropped: Arc<AtomicU64>,
    ) -> (Self, mpsc::Receiver<LocationSample>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, dropped }, rx)
    }

    /// Offer a sample to the engine.
    pub fn deliver(&self, sample: LocationSample) -> Delivery {
        match self.tx.try_send(sample) {
            Ok(()) => Delivery::Accepted,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Location channel full, dropping sample");
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Whether the receiving side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Samples dropped because the channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
