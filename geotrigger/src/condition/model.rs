//! Trigger condition model.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;

use super::term::{Term, TermKind};

/// Identifier of a condition, unique within a cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionId(String);

impl ConditionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConditionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConditionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Classification tag used to route a fired condition.
///
/// Alert types (`ANIMAL_ON_ROAD`) and sensor features (`sensor/camera`) are
/// both categories; the engine does not interpret them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category(String);

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Category {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A geo-anchored condition held by the [`ConditionCache`](crate::cache::ConditionCache).
///
/// Immutable once built; the cache hands out clones.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerCondition {
    id: ConditionId,
    anchor: GeoPoint,
    radius: Option<f64>,
    category: Category,
    terms: Vec<Term>,
    owner: Option<String>,
    task_ids: Vec<u64>,
    callback_uri: Option<String>,
    created: Option<DateTime<Utc>>,
}

impl TriggerCondition {
    /// Create a point/radius condition without terms.
    pub fn new(id: impl Into<ConditionId>, anchor: GeoPoint, category: impl Into<Category>) -> Self {
        Self {
            id: id.into(),
            anchor,
            radius: None,
            category: category.into(),
            terms: Vec::new(),
            owner: None,
            task_ids: Vec::new(),
            callback_uri: None,
            created: None,
        }
    }

    /// Override the speed-based threshold with a fixed radius in meters.
    pub fn with_radius(mut self, radius_m: f64) -> Self {
        self.radius = Some(radius_m);
        self
    }

    /// Append a term. Terms are evaluated in insertion order.
    pub fn with_term(mut self, term: Term) -> Self {
        self.terms.push(term);
        self
    }

    pub fn with_terms(mut self, terms: impl IntoIterator<Item = Term>) -> Self {
        self.terms.extend(terms);
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_task_ids(mut self, task_ids: Vec<u64>) -> Self {
        self.task_ids = task_ids;
        self
    }

    pub fn with_callback_uri(mut self, uri: impl Into<String>) -> Self {
        self.callback_uri = Some(uri.into());
        self
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = Some(created);
        self
    }

    pub fn id(&self) -> &ConditionId {
        &self.id
    }

    pub fn anchor(&self) -> &GeoPoint {
        &self.anchor
    }

    pub fn radius(&self) -> Option<f64> {
        self.radius
    }

    pub fn category(&self) -> &Category {
        &self.category
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Whether firing is gated by terms rather than by the anchor radius.
    pub fn has_terms(&self) -> bool {
        !self.terms.is_empty()
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn task_ids(&self) -> &[u64] {
        &self.task_ids
    }

    pub fn callback_uri(&self) -> Option<&str> {
        self.callback_uri.as_deref()
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created
    }

    /// First parsable point term, if any.
    pub fn first_point_term(&self) -> Option<GeoPoint> {
        first_point(&self.terms)
    }
}

/// First point term in `terms` whose value parses.
pub(crate) fn first_point(terms: &[Term]) -> Option<GeoPoint> {
    terms.iter().find_map(|term| match term.kind() {
        TermKind::LocationPoint(point) => *point,
        _ => None,
    })
}
