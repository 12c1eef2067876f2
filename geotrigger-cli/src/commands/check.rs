//! Check command - classify a conditions file against one location.

use std::path::PathBuf;

use geotrigger::condition::TriggerCondition;
use geotrigger::config::EngineConfig;
use geotrigger::geo::{haversine_distance, GeoPoint};
use geotrigger::location::LocationSample;
use geotrigger::matcher::{MatchEvaluator, MatchResult};
use serde_json::{json, Value};
use tracing::warn;

use super::common::read_records;
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the check command.
#[derive(Debug, Clone)]
pub struct CheckArgs {
    pub conditions: PathBuf,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: Option<f64>,
    pub bearing: Option<f64>,
    pub max_range: Option<f64>,
}

/// Run the check command, printing the classification as JSON.
pub fn run(runner: &CliRunner, args: CheckArgs) -> Result<(), CliError> {
    runner.log_startup("check");
    let report = check(runner.config().engine.clone(), &args)?;
    let text = serde_json::to_string_pretty(&report)
        .map_err(|e| CliError::Runtime(format!("Failed to encode report: {}", e)))?;
    println!("{}", text);
    Ok(())
}

fn check(mut config: EngineConfig, args: &CheckArgs) -> Result<Value, CliError> {
    if let Some(range) = args.max_range {
        config = config.with_max_retrieval_range(range);
    }

    let here = GeoPoint::new(args.latitude, args.longitude);
    if !here.is_valid() {
        return Err(CliError::Input(format!("invalid location {}", here)));
    }
    let mut sample = LocationSample::at(here);
    if let Some(speed) = args.speed {
        sample = sample.with_speed(speed);
    }
    if let Some(bearing) = args.bearing {
        sample = sample.with_bearing(bearing);
    }

    let mut conditions = Vec::new();
    for record in read_records(&args.conditions)? {
        match TriggerCondition::try_from(record) {
            Ok(condition) => conditions.push(condition),
            Err(e) => warn!(error = %e, "Skipping malformed condition"),
        }
    }

    let result = MatchEvaluator::new(&config).evaluate(&sample, &conditions);
    Ok(report(&here, &result))
}

fn report(here: &GeoPoint, result: &MatchResult) -> Value {
    let describe = |condition: &TriggerCondition| {
        json!({
            "id": condition.id().as_str(),
            "category": condition.category().as_str(),
            "distanceM": haversine_distance(here, condition.anchor()).round(),
        })
    };
    json!({
        "inRange": result.in_range.iter().map(describe).collect::<Vec<_>>(),
        "ahead": result.ahead.iter().map(describe).collect::<Vec<_>>(),
        "evicted": result.evicted.iter().map(|id| id.as_str()).collect::<Vec<_>>(),
    })
}
