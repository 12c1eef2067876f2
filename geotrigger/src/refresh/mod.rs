//! Periodic, single-flight refresh of the condition cache.
//!
//! # State Machine
//!
//! ```text
//!            kick() / timer
//!   Idle ───────────────────► Fetching
//!    ▲                           │
//!    └───── merge or failure ────┘
//!
//!   kick() while Fetching ──► Skipped (no second fetch)
//! ```
//!
//! The scheduler never retries on its own beyond the fixed interval, and a
//! failed fetch leaves the cache untouched.

mod scheduler;

pub use scheduler::{KickOutcome, MergeSummary, RefreshScheduler};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::condition::ConditionRecord;
use crate::config::ConfigError;
use crate::geo::GeoPoint;
use crate::BoxFuture;

/// Errors from fetching conditions.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network or service failure. Retried on the next interval.
    #[error("transport error: {0}")]
    Transport(String),

    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Fetcher is not usable until reconfigured.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),
}

impl FetchError {
    /// Whether the next scheduled fetch may succeed without intervention.
    pub fn is_transient(&self) -> bool {
        !matches!(self, FetchError::InvalidConfiguration(_))
    }
}

/// Parameters of one fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FetchRequest {
    /// Only conditions created after this instant are wanted.
    pub since: Option<DateTime<Utc>>,
    /// Last known user position, for services that filter geographically.
    pub around: Option<GeoPoint>,
}

/// Source of trigger conditions.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, Result<Vec<ConditionRecord>, FetchError>>;
}
