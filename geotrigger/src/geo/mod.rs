//! Proximity geometry.
//!
//! Pure functions for great-circle distance, bearings, bearing-cone membership
//! and the speed-dependent distance thresholds used to decide when a condition
//! is "in range".
//!
//! # Thresholds
//!
//! Two separate threshold policies exist:
//!
//! - [`ThresholdPolicy::distance_threshold`]: how far the user travels in the
//!   next `lookahead_secs` seconds, with a fixed fallback when (nearly) stationary.
//!   Used for anchor/radius conditions.
//! - [`speed_compensated_threshold`]: tiered policy for point terms. Too slow or
//!   too fast returns [`NEVER_TRIGGER`].
//!
//! ```text
//! speed (m/s)   0 ──── 2.5 ──── 5 ──────────── 40 ────►
//! point term      never   25 m    7 × speed      never
//! ```

mod types;

pub use types::{GeoPoint, MAX_LAT, MAX_LON, MIN_LAT, MIN_LON};

/// Mean Earth radius in meters (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Default half width of the "ahead" bearing cone in degrees.
pub const DEFAULT_BEARING_CONE_HALF_WIDTH_DEG: f64 = 60.0;

/// Default distance threshold in meters when speed is unknown or below 1 m/s.
pub const DEFAULT_DISTANCE_THRESHOLD_M: f64 = 200.0;

/// Default look-ahead time in seconds for moving users.
pub const DEFAULT_LOOKAHEAD_SECS: f64 = 20.0;

/// Below this speed (m/s) the user is treated as stationary.
pub const STATIONARY_SPEED_MPS: f64 = 1.0;

/// Threshold value that never matches any distance.
pub const NEVER_TRIGGER: f64 = -1.0;

/// Point terms: slowest speed (m/s) considered an approach.
const POINT_MIN_SPEED_MPS: f64 = 2.5;

/// Point terms: upper bound (exclusive) of the slow tier.
const POINT_SLOW_SPEED_MPS: f64 = 5.0;

/// Point terms: fastest speed (m/s) still evaluated.
const POINT_MAX_SPEED_MPS: f64 = 40.0;

/// Point terms: fixed activation distance in the slow tier.
const POINT_SLOW_DISTANCE_M: f64 = 25.0;

/// Point terms: seconds of travel allowed before reaching the target.
const POINT_APPROACH_SECS: f64 = 7.0;

/// Great-circle distance between two points in meters (haversine formula).
///
/// Returns NaN if either point has non-finite coordinates.
pub fn haversine_distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Initial great-circle bearing from `from` to `to`.
///
/// Returns degrees in `[0, 360)`, where 0 = North, 90 = East.
pub fn bearing_to(from: &GeoPoint, to: &GeoPoint) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let dlon = (to.longitude - from.longitude).to_radians();

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    normalize_bearing(y.atan2(x).to_degrees())
}

/// Normalize a bearing to `[0, 360)`.
pub fn normalize_bearing(bearing: f64) -> f64 {
    ((bearing % 360.0) + 360.0) % 360.0
}

/// Smallest angle between two bearings in degrees (`0..=180`).
///
/// Handles wraparound (e.g., 350° to 10° is 20°, not 340°).
pub fn bearing_difference(a: f64, b: f64) -> f64 {
    let diff = (normalize_bearing(a) - normalize_bearing(b)).abs();
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}

/// Whether `target` lies within `half_width` degrees of `current`.
///
/// Non-finite input never matches.
pub fn in_bearing_cone(current: f64, target: f64, half_width: f64) -> bool {
    bearing_difference(current, target) <= half_width
}

/// Point reached by travelling `distance_m` from `from` along `bearing` degrees.
pub fn destination(from: &GeoPoint, bearing: f64, distance_m: f64) -> GeoPoint {
    let delta = distance_m / EARTH_RADIUS_M;
    let theta = bearing.to_radians();
    let lat1 = from.latitude.to_radians();
    let lon1 = from.longitude.to_radians();

    let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * theta.cos()).asin();
    let lon2 = lon1
        + (theta.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());

    let longitude = (lon2.to_degrees() + 540.0) % 360.0 - 180.0;
    GeoPoint::new(lat2.to_degrees(), longitude)
}

/// Distance threshold policy for anchor/radius conditions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdPolicy {
    /// Threshold used while stationary or when speed is unknown (meters).
    pub default_distance_m: f64,
    /// Look-ahead time used while moving (seconds).
    pub lookahead_secs: f64,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            default_distance_m: DEFAULT_DISTANCE_THRESHOLD_M,
            lookahead_secs: DEFAULT_LOOKAHEAD_SECS,
        }
    }
}

impl ThresholdPolicy {
    /// How far ahead (meters) a condition counts as in range at `speed` m/s.
    pub fn distance_threshold(&self, speed: f64) -> f64 {
        if speed < STATIONARY_SPEED_MPS {
            self.default_distance_m
        } else {
            speed * self.lookahead_secs
        }
    }
}

/// Distance threshold at `speed` m/s with the default policy (200 m / 20 s).
pub fn default_distance_threshold(speed: f64) -> f64 {
    ThresholdPolicy::default().distance_threshold(speed)
}

/// Tiered activation distance for point terms.
///
/// Returns [`NEVER_TRIGGER`] when the user is too slow to be approaching or
/// too fast for the reading to be trusted.
pub fn speed_compensated_threshold(speed: f64) -> f64 {
    if speed < POINT_MIN_SPEED_MPS {
        NEVER_TRIGGER
    } else if speed < POINT_SLOW_SPEED_MPS {
        POINT_SLOW_DISTANCE_M
    } else if speed > POINT_MAX_SPEED_MPS {
        tracing::debug!(speed, "Speed above point-term limit, not evaluating");
        NEVER_TRIGGER
    } else {
        POINT_APPROACH_SECS * speed
    }
}
