//! Tracing subscriber setup.
//!
//! Binaries call [`init_logging`] once at startup. Output goes to stderr and,
//! optionally, to a log file written by a background worker. The returned
//! [`LogGuard`] must be kept alive until exit so buffered file output is
//! flushed.
//!
//! `RUST_LOG` overrides the configured filter when
//! [`LogConfig::respect_env`] is set.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Default filter directive.
pub const DEFAULT_LOG_FILTER: &str = "geotrigger=info";

/// Logging setup failures.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("invalid log filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },

    #[error("log file path has no file name: {0}")]
    InvalidPath(PathBuf),

    #[error("failed to create log directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("a global subscriber is already installed")]
    AlreadyInitialized,
}

/// Logging options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `geotrigger=debug,reqwest=warn`.
    pub filter: String,
    /// Also write plain-text logs to this file.
    pub file: Option<PathBuf>,
    pub respect_env: bool,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            file: None,
            respect_env: true,
            ansi: true,
        }
    }
}

impl LogConfig {
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn with_respect_env(mut self, respect: bool) -> Self {
        self.respect_env = respect;
        self
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    /// Raise the filter to `debug` for this crate.
    pub fn verbose(self) -> Self {
        self.with_filter("geotrigger=debug")
    }

    /// Build the filter, preferring `RUST_LOG` when allowed and set.
    pub fn env_filter(&self) -> Result<EnvFilter, LogError> {
        if self.respect_env {
            if let Ok(filter) = EnvFilter::try_from_default_env() {
                return Ok(filter);
            }
        }
        EnvFilter::try_new(&self.filter).map_err(|e| LogError::InvalidFilter {
            filter: self.filter.clone(),
            message: e.to_string(),
        })
    }
}

/// Keeps the file writer alive. Dropping it flushes pending file output.
#[derive(Debug)]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber.
pub fn init_logging(config: &LogConfig) -> Result<LogGuard, LogError> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.ansi)
        .with_target(false)
        .with_filter(config.env_filter()?);

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let (directory, file_name) = split_log_path(path)?;
            std::fs::create_dir_all(&directory).map_err(|source| LogError::Io {
                path: directory.clone(),
                source,
            })?;
            let appender = tracing_appender::rolling::never(&directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(config.env_filter()?);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|_| LogError::AlreadyInitialized)?;

    Ok(LogGuard { _file: guard })
}

fn split_log_path(path: &Path) -> Result<(PathBuf, &std::ffi::OsStr), LogError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| LogError::InvalidPath(path.to_path_buf()))?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((directory, file_name))
}
