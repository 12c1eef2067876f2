//! geotrigger - proximity triggers for geo-anchored conditions
//!
//! This library decides, for a stream of location samples, which
//! location-anchored conditions are currently in range, which lie ahead in the
//! direction of travel, and which should fire. Fired conditions are reported
//! to a listener and, for categories that need a device action, parked in a
//! trigger queue until an actuator delivers output.
//!
//! # Modules
//!
//! - [`geo`] - distances, bearings and speed-compensated thresholds
//! - [`condition`] - trigger conditions, terms and their wire records
//! - [`cache`] - the shared condition set
//! - [`matcher`] - per-sample classification into in range / ahead / evicted
//! - [`refresh`] - periodic, single-flight condition fetching
//! - [`trigger`] - actuator-gated trigger queues
//! - [`location`] - location samples and sources
//! - [`engine`] - the orchestrator tying everything together
//! - [`http`] - HTTP fetcher and flusher
//! - [`config`] - engine and service configuration
//! - [`logging`] - tracing subscriber setup for binaries

pub mod cache;
pub mod condition;
pub mod config;
pub mod engine;
pub mod error;
pub mod generation;
pub mod geo;
pub mod http;
pub mod listener;
pub mod location;
pub mod logging;
pub mod matcher;
pub mod refresh;
pub mod stats;
pub mod trigger;

use std::future::Future;
use std::pin::Pin;

pub use engine::{Engine, EngineBuilder};
pub use error::EngineError;

/// Boxed future used by the dyn-compatible async traits of this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
