//! Replay of a recorded route, for demos and field-free testing.
//!
//! A route file is a JSON array of points using the short `long` key:
//!
//! ```text
//! [
//!   { "lat": 61.4981, "long": 23.7610 },
//!   { "lat": 61.4990, "long": 23.7655 }
//! ]
//! ```
//!
//! Points are emitted one per interval. Speed is drawn from a configured
//! range; bearing is derived from the previous point.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use serde::Deserialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Delivery, LocationError, LocationSample, LocationSink, LocationSource};
use crate::geo::{bearing_to, GeoPoint};

/// Default pause between replayed points.
pub const DEFAULT_REPLAY_INTERVAL: Duration = Duration::from_secs(6);

/// Shortest pause between replayed points; shorter intervals are raised to it.
pub const MIN_REPLAY_INTERVAL: Duration = Duration::from_millis(10);

/// Default lower bound of the simulated speed (m/s).
pub const DEFAULT_MIN_SPEED_MPS: f64 = 5.0;

/// Default upper bound of the simulated speed (m/s).
pub const DEFAULT_MAX_SPEED_MPS: f64 = 20.0;

#[derive(Debug, Deserialize)]
struct RoutePoint {
    lat: f64,
    long: f64,
}

/// Ordered, non-empty list of points to replay.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    points: Arc<[GeoPoint]>,
}

impl Route {
    /// Build a route, rejecting empty lists and invalid coordinates.
    pub fn new(points: Vec<GeoPoint>) -> Result<Self, LocationError> {
        if points.is_empty() {
            return Err(LocationError::Route("route has no points".to_string()));
        }
        if let Some((index, point)) = points.iter().enumerate().find(|(_, p)| !p.is_valid()) {
            return Err(LocationError::Route(format!(
                "point {} out of range: {}",
                index, point
            )));
        }
        Ok(Self {
            points: points.into(),
        })
    }

    /// Parse a JSON route.
    pub fn from_json(json: &str) -> Result<Self, LocationError> {
        let raw: Vec<RoutePoint> =
            serde_json::from_str(json).map_err(|e| LocationError::Route(e.to_string()))?;
        Self::new(
            raw.into_iter()
                .map(|p| GeoPoint::new(p.lat, p.long))
                .collect(),
        )
    }

    /// Read and parse a JSON route file.
    pub fn from_file(path: &Path) -> Result<Self, LocationError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| LocationError::Route(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    pub fn points(&self) -> &[GeoPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false; routes are never empty.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Replay timing and speed simulation.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Pause between consecutive points.
    pub interval: Duration,
    /// Inclusive lower bound of simulated speed (m/s).
    pub min_speed: f64,
    /// Inclusive upper bound of simulated speed (m/s).
    pub max_speed: f64,
    /// Restart from the first point after the last one.
    pub looping: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_REPLAY_INTERVAL,
            min_speed: DEFAULT_MIN_SPEED_MPS,
            max_speed: DEFAULT_MAX_SPEED_MPS,
            looping: true,
        }
    }
}

impl ReplayConfig {
    /// Set the pause between points, at least [`MIN_REPLAY_INTERVAL`].
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_REPLAY_INTERVAL);
        self
    }

    /// Set the speed range; bounds are swapped if given in reverse.
    ///
    /// Non-finite bounds are ignored and negative ones raised to zero.
    pub fn with_speed_range(mut self, min: f64, max: f64) -> Self {
        if !min.is_finite() || !max.is_finite() {
            warn!(min, max, "Ignoring non-finite replay speed range");
            return self;
        }
        self.min_speed = min.min(max).max(0.0);
        self.max_speed = min.max(max).max(0.0);
        self
    }

    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Simulated speed, or `None` when the range is unusable.
    fn sample_speed(&self) -> Option<f64> {
        let (min, max) = (self.min_speed, self.max_speed);
        if !min.is_finite() || !max.is_finite() || min < 0.0 {
            return None;
        }
        if max > min {
            Some(rand::rng().random_range(min..=max))
        } else {
            Some(min)
        }
    }

    fn tick_interval(&self) -> Duration {
        self.interval.max(MIN_REPLAY_INTERVAL)
    }
}

/// Location source replaying a [`Route`] on a Tokio task.
#[derive(Debug)]
pub struct ReplayLocationSource {
    route: Route,
    config: ReplayConfig,
    running: Mutex<Option<CancellationToken>>,
}

impl ReplayLocationSource {
    pub fn new(route: Route, config: ReplayConfig) -> Self {
        Self {
            route,
            config,
            running: Mutex::new(None),
        }
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }
}

impl LocationSource for ReplayLocationSource {
    fn subscribe(&self, sink: LocationSink) -> Result<(), LocationError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| LocationError::NoRuntime(e.to_string()))?;

        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|t| !t.is_cancelled()) {
            return Err(LocationError::AlreadySubscribed);
        }

        let cancel = CancellationToken::new();
        *running = Some(cancel.clone());

        info!(
            points = self.route.len(),
            interval_ms = self.config.tick_interval().as_millis() as u64,
            "Starting route replay"
        );
        handle.spawn(replay(
            self.route.clone(),
            self.config.clone(),
            sink,
            cancel,
        ));
        Ok(())
    }

    fn unsubscribe(&self) {
        if let Some(cancel) = self.running.lock().take() {
            cancel.cancel();
        }
    }
}

async fn replay(route: Route, config: ReplayConfig, sink: LocationSink, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(config.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut previous: Option<GeoPoint> = None;
    let mut index = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if index >= route.len() {
            if !config.looping {
                debug!("Route replay finished");
                break;
            }
            index = 0;
        }
        let point = route.points()[index];
        index += 1;

        let mut sample = LocationSample::at(point);
        if let Some(speed) = config.sample_speed() {
            sample = sample.with_speed(speed);
        }
        if let Some(prev) = previous.filter(|p| *p != point) {
            sample = sample.with_bearing(bearing_to(&prev, &point));
        }
        previous = Some(point);

        if sink.deliver(sample) == Delivery::Closed {
            debug!("Location sink closed, stopping replay");
            break;
        }
    }
}
