//! Pending triggers waiting for an actuator.
//!
//! Some categories need a device action when a condition fires (take a photo,
//! record a sound). Their fired conditions are parked in a [`TriggerQueue`]
//! until the [`Actuator`] delivers output, which is then attached to every
//! parked entry and handed to a [`Flusher`] as one batch.
//!
//! # Flow
//!
//! ```text
//! on_fire ──► [entries] ──► Actuator::request ─ ─ ─► ActuatorCompletion::complete
//!                 ▲                                          │
//!                 │ flush failed: put back                   ▼
//!                 └──────────────────────────── attach output, Flusher::flush
//! ```
//!
//! Only one actuator request is outstanding per queue. A failed actuation
//! leaves the entries queued; the next fire requests again.

mod queue;

pub use queue::TriggerQueue;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::condition::{Category, ConditionId, TriggerCondition};
use crate::config::ConfigError;
use crate::geo::GeoPoint;
use crate::location::LocationSample;
use crate::BoxFuture;

pub use queue::ActuatorCompletion;

/// Actuator failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActuatorError {
    /// Device is busy with another request.
    #[error("actuator busy")]
    Busy,

    /// Device cannot be used right now.
    #[error("actuator unavailable: {0}")]
    Unavailable(String),

    /// Device accepted the request but failed to produce output.
    #[error("actuation failed: {0}")]
    Failed(String),
}

/// Flush failures. The batch is put back in the queue.
#[derive(Debug, Error)]
pub enum FlushError {
    #[error("transport error: {0}")]
    Transport(String),

    /// Service answered with a non-success status.
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("encode error: {0}")]
    Encode(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),
}

/// Output produced by an actuator, e.g. a captured image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActuatorOutput {
    /// MIME type of `data`.
    pub content_type: String,
    pub data: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

impl ActuatorOutput {
    pub fn new(content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            data,
            captured_at: Utc::now(),
        }
    }
}

/// Measurement recorded when a condition fired, plus the actuator output once known.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerPayload {
    pub location: GeoPoint,
    pub speed: Option<f64>,
    pub bearing: Option<f64>,
    pub fired_at: DateTime<Utc>,
    pub output: Option<ActuatorOutput>,
}

impl TriggerPayload {
    pub fn from_sample(sample: &LocationSample) -> Self {
        Self {
            location: *sample.point(),
            speed: sample.speed(),
            bearing: sample.bearing(),
            fired_at: Utc::now(),
            output: None,
        }
    }
}

/// A fired condition waiting in a [`TriggerQueue`].
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerQueueEntry {
    pub condition: TriggerCondition,
    pub payload: TriggerPayload,
}

/// Request handed to an [`Actuator`].
#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorRequest {
    pub category: Category,
    /// Where the user was when the request was made.
    pub location: GeoPoint,
    /// Conditions waiting for the output.
    pub pending: Vec<ConditionId>,
}

/// Device that produces output for queued triggers.
///
/// `request` must not block. The actuator reports back through `completion`,
/// from any thread, at most once.
pub trait Actuator: Send + Sync {
    fn request(
        &self,
        request: ActuatorRequest,
        completion: ActuatorCompletion,
    ) -> Result<(), ActuatorError>;
}

/// Destination of completed triggers.
pub trait Flusher: Send + Sync {
    fn flush<'a>(
        &'a self,
        category: &'a Category,
        batch: &'a [TriggerQueueEntry],
    ) -> BoxFuture<'a, Result<(), FlushError>>;
}

/// Wire form of a flushed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushRecord {
    pub condition_id: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub task_ids: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_uri: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearing: Option<f64>,
    pub fired_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<ActuatorOutput>,
}

impl From<&TriggerQueueEntry> for FlushRecord {
    fn from(entry: &TriggerQueueEntry) -> Self {
        let condition = &entry.condition;
        let payload = &entry.payload;
        Self {
            condition_id: condition.id().to_string(),
            category: condition.category().to_string(),
            task_ids: condition.task_ids().to_vec(),
            callback_uri: condition.callback_uri().map(str::to_string),
            latitude: payload.location.latitude,
            longitude: payload.location.longitude,
            speed: payload.speed,
            bearing: payload.bearing,
            fired_at: payload.fired_at,
            output: payload.output.clone(),
        }
    }
}
