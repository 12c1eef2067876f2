//! Engine-level errors.
//!
//! Each concern defines its own error type next to the code that raises it
//! ([`ConditionError`](crate::condition::ConditionError),
//! [`FetchError`](crate::refresh::FetchError),
//! [`ActuatorError`](crate::trigger::ActuatorError),
//! [`FlushError`](crate::trigger::FlushError),
//! [`ConfigError`](crate::config::ConfigError),
//! [`LocationError`](crate::location::LocationError)).
//! [`EngineError`] wraps the ones that can surface from engine lifecycle calls.

use thiserror::Error;

use crate::config::ConfigError;
use crate::location::LocationError;
use crate::refresh::FetchError;

/// Errors returned by [`Engine`](crate::engine::Engine) lifecycle operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `start()` called on a running engine.
    #[error("engine is already running")]
    AlreadyRunning,

    /// Background tasks need a Tokio runtime.
    #[error("no Tokio runtime available: {0}")]
    NoRuntime(String),

    /// Engine configuration rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Location source refused the subscription.
    #[error("location source: {0}")]
    Location(#[from] LocationError),

    /// A fetch could not be issued.
    #[error("refresh: {0}")]
    Fetch(#[from] FetchError),

    /// Actuator result for a category without a queue.
    #[error("no actuator registered for category {0}")]
    UnknownCategory(String),
}
