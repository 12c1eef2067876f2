//! Location input for the engine.
//!
//! Platform providers push fixes; the engine consumes them from a bounded
//! channel. A [`LocationSource`] is anything that can be told where to push.
//!
//! # Architecture
//!
//! ```text
//! platform callback ──► LocationSource ──► LocationSink ──► [bounded mpsc] ──► Engine
//!                       (push / replay)    (try_send,                         (evaluation
//!                                           never blocks)                       loop)
//! ```
//!
//! Two sources ship with the crate:
//!
//! - [`PushLocationSource`]: glue for providers that hand over fixes one by one
//! - [`ReplayLocationSource`]: demo mode, replays a recorded route in a loop

mod push;
mod replay;
mod sample;

pub use push::PushLocationSource;
pub use replay::{ReplayConfig, ReplayLocationSource, Route, MIN_REPLAY_INTERVAL};
pub use sample::{Delivery, LastKnownLocation, LocationSample, LocationSink};

use thiserror::Error;

/// Errors raised by location sources.
#[derive(Debug, Error)]
pub enum LocationError {
    /// The source already feeds another sink.
    #[error("location source already has a subscriber")]
    AlreadySubscribed,

    /// The source needs a Tokio runtime to run.
    #[error("no Tokio runtime available: {0}")]
    NoRuntime(String),

    /// A route file could not be read or parsed.
    #[error("failed to load route: {0}")]
    Route(String),
}

/// Push interface delivering [`LocationSample`]s to a subscriber.
///
/// Implementations must not block the caller of `subscribe`/`unsubscribe`
/// and must stop delivering once `unsubscribe` returns.
pub trait LocationSource: Send + Sync {
    /// Start delivering samples to `sink`.
    fn subscribe(&self, sink: LocationSink) -> Result<(), LocationError>;

    /// Stop delivering samples. Idempotent.
    fn unsubscribe(&self);
}
