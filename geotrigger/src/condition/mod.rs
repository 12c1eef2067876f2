//! Trigger conditions.
//!
//! A [`TriggerCondition`] is a geo-anchored rule fetched from the service:
//! an alert ("animal on road here") or a sensor-task condition ("take a photo
//! when passing this point"). Both share one model:
//!
//! - **anchor** and optional **radius** for distance checks
//! - **category** for routing to listeners and actuators
//! - ordered **terms** which must all hold before the condition fires
//!
//! Fetchers deliver [`ConditionRecord`]s; converting a record validates it.

mod model;
mod record;
mod term;

pub use model::{Category, ConditionId, TriggerCondition};
pub use record::{ConditionError, ConditionRecord};
pub use term::{
    Term, TermKind, TermRecord, TERM_LOCATION_AREA, TERM_LOCATION_POINT, TERM_SENSOR_VELOCITY,
    TERM_TEXT_DESCRIPTION, TERM_TIME_VALIDITY_RANGE,
};
