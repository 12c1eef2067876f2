//! Collaborators shared by the CLI commands.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use geotrigger::condition::{Category, ConditionRecord, TriggerCondition};
use geotrigger::listener::EngineListener;
use geotrigger::refresh::{FetchError, FetchRequest, Fetcher};
use geotrigger::trigger::{
    Actuator, ActuatorCompletion, ActuatorError, ActuatorOutput, ActuatorRequest, FlushError,
    FlushRecord, Flusher, TriggerQueueEntry,
};
use geotrigger::BoxFuture;
use tracing::debug;

use crate::error::CliError;

/// Read a JSON array of condition records.
pub fn read_records(path: &Path) -> Result<Vec<ConditionRecord>, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text)
        .map_err(|e| CliError::Input(format!("{}: {}", path.display(), e)))
}

/// Serves conditions from a local JSON file, re-read on every fetch.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    path: PathBuf,
}

impl FileFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Fetcher for FileFetcher {
    fn fetch(&self, _request: FetchRequest) -> BoxFuture<'_, Result<Vec<ConditionRecord>, FetchError>> {
        Box::pin(async move {
            let bytes = tokio::fs::read(&self.path)
                .await
                .map_err(|e| FetchError::Transport(format!("{}: {}", self.path.display(), e)))?;
            serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode(e.to_string()))
        })
    }
}

/// Prints engine events as they happen.
#[derive(Debug, Default)]
pub struct ConsoleListener;

fn join(categories: &BTreeSet<Category>) -> String {
    categories
        .iter()
        .map(Category::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

impl EngineListener for ConsoleListener {
    fn on_evaluated(&self, in_range: &BTreeSet<Category>, ahead: &BTreeSet<Category>) {
        if !in_range.is_empty() || !ahead.is_empty() {
            println!("  in range: [{}]  ahead: [{}]", join(in_range), join(ahead));
        }
    }

    fn on_fired(&self, condition: &TriggerCondition) {
        println!(
            "  FIRED {} ({}) at {}",
            condition.id(),
            condition.category(),
            condition.anchor()
        );
    }

    fn on_flushed(&self, category: &Category, batch: &[TriggerQueueEntry]) {
        println!("  flushed {} {} trigger(s)", batch.len(), category);
    }
}

/// Stand-in for a camera: answers every request after `delay` with a
/// placeholder image.
#[derive(Debug, Clone)]
pub struct SimulatedCamera {
    delay: Duration,
}

impl SimulatedCamera {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Actuator for SimulatedCamera {
    fn request(
        &self,
        request: ActuatorRequest,
        completion: ActuatorCompletion,
    ) -> Result<(), ActuatorError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| ActuatorError::Unavailable(e.to_string()))?;
        let delay = self.delay;
        debug!(
            category = %request.category,
            pending = request.pending.len(),
            "Simulated capture"
        );
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let data = format!("simulated capture at {}", request.location).into_bytes();
            completion.complete(Ok(ActuatorOutput::new("text/plain", data)));
        });
        Ok(())
    }
}

/// Writes flushed triggers to stdout, one JSON object per line.
#[derive(Debug, Default)]
pub struct StdoutFlusher;

impl Flusher for StdoutFlusher {
    fn flush<'a>(
        &'a self,
        _category: &'a Category,
        batch: &'a [TriggerQueueEntry],
    ) -> BoxFuture<'a, Result<(), FlushError>> {
        Box::pin(async move {
            for entry in batch {
                let line = serde_json::to_string(&FlushRecord::from(entry))
                    .map_err(|e| FlushError::Encode(e.to_string()))?;
                println!("{}", line);
            }
            Ok(())
        })
    }
}
