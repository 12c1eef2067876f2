//! Condition terms.
//!
//! A term is a key/value predicate attached to a condition. Keys follow the
//! service's naming (`location/point`, `text/description`, ...). The value is
//! parsed once, when the condition is built, so evaluation never touches text.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;

/// Term key: distance to a single point.
pub const TERM_LOCATION_POINT: &str = "location/point";
/// Term key: inside a polygon area.
pub const TERM_LOCATION_AREA: &str = "location/area";
/// Term key: velocity range.
pub const TERM_SENSOR_VELOCITY: &str = "sensor/velocity";
/// Term key: validity time range.
pub const TERM_TIME_VALIDITY_RANGE: &str = "time/validFromToRange";
/// Term key: free-text description.
pub const TERM_TEXT_DESCRIPTION: &str = "text/description";

/// Parsed form of a term value.
#[derive(Debug, Clone, PartialEq)]
pub enum TermKind {
    /// Proximity to a point. `None` when the value could not be parsed.
    LocationPoint(Option<GeoPoint>),
    /// Polygon area. Never matches.
    LocationArea,
    /// Velocity range. Ignored (never matches).
    Velocity,
    /// Time validity range. Ignored (never matches).
    TimeValidityRange,
    /// Informational text, always holds.
    TextDescription,
    /// Key not known to this engine. Never matches.
    Unknown,
}

impl TermKind {
    /// Short name for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            TermKind::LocationPoint(_) => "location-point",
            TermKind::LocationArea => "location-area",
            TermKind::Velocity => "velocity",
            TermKind::TimeValidityRange => "time-range",
            TermKind::TextDescription => "text",
            TermKind::Unknown => "unknown",
        }
    }
}

/// One key/value predicate of a condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    key: String,
    value: String,
    kind: TermKind,
}

impl Term {
    /// Build a term, classifying it by key.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        let kind = match key.as_str() {
            TERM_LOCATION_POINT => TermKind::LocationPoint(GeoPoint::parse_pair(&value)),
            TERM_LOCATION_AREA => TermKind::LocationArea,
            TERM_SENSOR_VELOCITY => TermKind::Velocity,
            TERM_TIME_VALIDITY_RANGE => TermKind::TimeValidityRange,
            TERM_TEXT_DESCRIPTION => TermKind::TextDescription,
            _ => TermKind::Unknown,
        };
        Self { key, value, kind }
    }

    /// Point term at the given location.
    pub fn point(point: GeoPoint) -> Self {
        Self::new(TERM_LOCATION_POINT, point.to_string())
    }

    /// Description term.
    pub fn description(text: impl Into<String>) -> Self {
        Self::new(TERM_TEXT_DESCRIPTION, text)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn kind(&self) -> &TermKind {
        &self.kind
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}='{}'", self.key, self.value)
    }
}

/// Wire form of a term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermRecord {
    pub key: String,
    pub value: String,
}

impl From<TermRecord> for Term {
    fn from(record: TermRecord) -> Self {
        Term::new(record.key, record.value)
    }
}

impl From<&Term> for TermRecord {
    fn from(term: &Term) -> Self {
        Self {
            key: term.key.clone(),
            value: term.value.clone(),
        }
    }
}
