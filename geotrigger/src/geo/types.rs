//! Geographic point type shared by the engine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Minimum valid latitude in degrees.
pub const MIN_LAT: f64 = -90.0;
/// Maximum valid latitude in degrees.
pub const MAX_LAT: f64 = 90.0;
/// Minimum valid longitude in degrees.
pub const MIN_LON: f64 = -180.0;
/// Maximum valid longitude in degrees.
pub const MAX_LON: f64 = 180.0;

/// A WGS84 latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees (-90 to 90).
    pub latitude: f64,
    /// Longitude in degrees (-180 to 180).
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a new point. No validation is performed.
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether both coordinates are finite and inside their valid ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (MIN_LAT..=MAX_LAT).contains(&self.latitude)
            && (MIN_LON..=MAX_LON).contains(&self.longitude)
    }

    /// Parse a `"lat,lon"` pair as used by point terms.
    ///
    /// Returns `None` when the text does not hold two parsable numbers.
    pub fn parse_pair(text: &str) -> Option<Self> {
        let (lat, lon) = text.split_once(',')?;
        let latitude = lat.trim().parse::<f64>().ok()?;
        let longitude = lon.trim().parse::<f64>().ok()?;
        Some(Self::new(latitude, longitude))
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.latitude, self.longitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pair() {
        let point = GeoPoint::parse_pair("61.5, 23.79").unwrap();
        assert_eq!(point, GeoPoint::new(61.5, 23.79));
    }

    #[test]
    fn test_parse_pair_rejects_garbage() {
        assert!(GeoPoint::parse_pair("61.5").is_none());
        assert!(GeoPoint::parse_pair("north,east").is_none());
        assert!(GeoPoint::parse_pair("").is_none());
    }

    #[test]
    fn test_validity() {
        assert!(GeoPoint::new(61.5, 23.79).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, -180.5).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        let point = GeoPoint::new(61.123456, -23.5);
        let parsed = GeoPoint::parse_pair(&point.to_string()).unwrap();
        assert!((parsed.latitude - point.latitude).abs() < 1e-6);
        assert!((parsed.longitude - point.longitude).abs() < 1e-6);
    }
}
