//! Wire form of a condition as delivered by a fetcher.
//!
//! Every field is optional on the wire. [`TriggerCondition::try_from`] decides
//! whether a record is usable; records that are not are dropped during merge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::GeoPoint;

use super::model::{first_point, TriggerCondition};
use super::term::{Term, TermRecord};

/// Reasons a fetched record cannot become a [`TriggerCondition`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConditionError {
    /// No identifier, so the record cannot be deduplicated.
    #[error("condition has no id")]
    MissingId,

    /// Neither coordinates nor a parsable point term.
    #[error("condition {id} has no anchor")]
    MissingAnchor { id: String },

    /// Coordinates outside the valid range or not finite.
    #[error("condition {id} has invalid anchor {latitude},{longitude}")]
    InvalidAnchor {
        id: String,
        latitude: f64,
        longitude: f64,
    },

    /// No category to route the condition with.
    #[error("condition {id} has no category")]
    MissingCategory { id: String },

    /// Radius present but not a positive finite number.
    #[error("condition {id} has invalid radius {radius}")]
    InvalidRadius { id: String, radius: f64 },
}

/// Condition as serialized by the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConditionRecord {
    pub id: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius: Option<f64>,
    pub category: Option<String>,
    pub terms: Vec<TermRecord>,
    pub owner: Option<String>,
    pub task_ids: Vec<u64>,
    pub callback_uri: Option<String>,
    pub created: Option<DateTime<Utc>>,
}

impl TryFrom<ConditionRecord> for TriggerCondition {
    type Error = ConditionError;

    fn try_from(record: ConditionRecord) -> Result<Self, Self::Error> {
        let id = record
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or(ConditionError::MissingId)?;

        let terms: Vec<Term> = record.terms.into_iter().map(Term::from).collect();

        // Task conditions carry their location in a point term only.
        let anchor = match (record.latitude, record.longitude) {
            (Some(latitude), Some(longitude)) => GeoPoint::new(latitude, longitude),
            _ => first_point(&terms)
                .ok_or_else(|| ConditionError::MissingAnchor { id: id.clone() })?,
        };
        if !anchor.is_valid() {
            return Err(ConditionError::InvalidAnchor {
                id,
                latitude: anchor.latitude,
                longitude: anchor.longitude,
            });
        }

        let category = record
            .category
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ConditionError::MissingCategory { id: id.clone() })?;

        if let Some(radius) = record.radius {
            if !radius.is_finite() || radius <= 0.0 {
                return Err(ConditionError::InvalidRadius { id, radius });
            }
        }

        let mut condition = TriggerCondition::new(id.as_str(), anchor, category.as_str())
            .with_terms(terms)
            .with_task_ids(record.task_ids);
        if let Some(radius) = record.radius {
            condition = condition.with_radius(radius);
        }
        if let Some(owner) = record.owner {
            condition = condition.with_owner(owner);
        }
        if let Some(uri) = record.callback_uri {
            condition = condition.with_callback_uri(uri);
        }
        if let Some(created) = record.created {
            condition = condition.with_created(created);
        }
        Ok(condition)
    }
}

impl From<&TriggerCondition> for ConditionRecord {
    fn from(condition: &TriggerCondition) -> Self {
        Self {
            id: Some(condition.id().to_string()),
            latitude: Some(condition.anchor().latitude),
            longitude: Some(condition.anchor().longitude),
            radius: condition.radius(),
            category: Some(condition.category().to_string()),
            terms: condition.terms().iter().map(TermRecord::from).collect(),
            owner: condition.owner().map(str::to_string),
            task_ids: condition.task_ids().to_vec(),
            callback_uri: condition.callback_uri().map(str::to_string),
            created: condition.created(),
        }
    }
}
