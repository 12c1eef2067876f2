//! Term evaluation.

use crate::condition::{Term, TermKind};
use crate::geo::{haversine_distance, speed_compensated_threshold};
use crate::location::LocationSample;

/// Decides whether a single term holds for a sample.
///
/// Implementations must be pure: the evaluator may stop calling them at the
/// first term that does not hold.
pub trait TermEvaluator: Send + Sync {
    fn evaluate(&self, term: &Term, sample: &LocationSample) -> bool;
}

/// Built-in term semantics.
///
/// | kind                  | holds when                                      |
/// |-----------------------|-------------------------------------------------|
/// | `location/point`      | distance < speed-compensated threshold          |
/// | `text/description`    | always                                          |
/// | area, velocity, time  | never                                           |
/// | unknown key           | never                                           |
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTermEvaluator;

impl TermEvaluator for DefaultTermEvaluator {
    fn evaluate(&self, term: &Term, sample: &LocationSample) -> bool {
        match term.kind() {
            TermKind::LocationPoint(Some(target)) => {
                let threshold = speed_compensated_threshold(sample.speed_or_zero());
                if threshold < 0.0 {
                    return false;
                }
                let distance = haversine_distance(sample.point(), target);
                // NaN compares false.
                distance < threshold
            }
            TermKind::LocationPoint(None) => {
                tracing::debug!(term = %term, "Unparsable point term");
                false
            }
            TermKind::TextDescription => true,
            TermKind::LocationArea
            | TermKind::Velocity
            | TermKind::TimeValidityRange
            | TermKind::Unknown => false,
        }
    }
}
