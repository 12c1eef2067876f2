//! CLI error type.

use std::fmt;
use std::path::PathBuf;

use geotrigger::config::ConfigError;
use geotrigger::condition::ConditionError;
use geotrigger::location::LocationError;
use geotrigger::logging::LogError;
use geotrigger::refresh::FetchError;
use geotrigger::trigger::FlushError;
use geotrigger::EngineError;

/// Errors reported to the user before exiting with a non-zero status.
#[derive(Debug)]
pub enum CliError {
    /// Invalid or missing configuration.
    Config(String),
    /// Reading or writing a file failed.
    Io { path: PathBuf, source: std::io::Error },
    /// Input file could not be parsed.
    Input(String),
    Engine(EngineError),
    Logging(LogError),
    Runtime(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Io { path, source } => write!(f, "{}: {}", path.display(), source),
            CliError::Input(msg) => write!(f, "Invalid input: {}", msg),
            CliError::Engine(e) => write!(f, "Engine error: {}", e),
            CliError::Logging(e) => write!(f, "Logging setup failed: {}", e),
            CliError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Io { source, .. } => Some(source),
            CliError::Engine(e) => Some(e),
            CliError::Logging(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<EngineError> for CliError {
    fn from(e: EngineError) -> Self {
        CliError::Engine(e)
    }
}

impl From<LocationError> for CliError {
    fn from(e: LocationError) -> Self {
        CliError::Input(e.to_string())
    }
}

impl From<ConditionError> for CliError {
    fn from(e: ConditionError) -> Self {
        CliError::Input(e.to_string())
    }
}

impl From<FetchError> for CliError {
    fn from(e: FetchError) -> Self {
        CliError::Engine(EngineError::Fetch(e))
    }
}

impl From<FlushError> for CliError {
    fn from(e: FlushError) -> Self {
        match e {
            FlushError::InvalidConfiguration(e) => CliError::Config(e.to_string()),
            other => CliError::Runtime(other.to_string()),
        }
    }
}

impl From<LogError> for CliError {
    fn from(e: LogError) -> Self {
        CliError::Logging(e)
    }
}
