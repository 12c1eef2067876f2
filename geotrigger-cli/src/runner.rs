//! Shared setup for commands: logging and configuration.

use std::path::{Path, PathBuf};

use geotrigger::config::{default_config_path, ConfigFile};
use geotrigger::logging::{init_logging, LogConfig, LogGuard};
use tracing::info;

use crate::error::CliError;

/// Global options every command accepts.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub config: Option<PathBuf>,
    pub verbose: bool,
    pub log_file: Option<PathBuf>,
}

/// Initialized logging plus the loaded configuration.
pub struct CliRunner {
    config: ConfigFile,
    config_path: Option<PathBuf>,
    _log: LogGuard,
}

impl CliRunner {
    pub fn new(options: &GlobalOptions) -> Result<Self, CliError> {
        let mut log_config = LogConfig::default();
        if options.verbose {
            log_config = log_config.verbose();
        }
        if let Some(path) = &options.log_file {
            log_config = log_config.with_file(path);
        }
        let log = init_logging(&log_config)?;

        let config_path = resolve_config_path(options.config.as_deref());
        let config = match &config_path {
            Some(path) => ConfigFile::load_or_default(path)?,
            None => ConfigFile::default(),
        };

        Ok(Self {
            config,
            config_path,
            _log: log,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn log_startup(&self, command: &str) {
        info!(
            version = geotrigger::VERSION,
            command,
            config = ?self.config_path,
            "geotrigger starting"
        );
    }

    /// Multi-threaded runtime for commands that run the engine.
    pub fn runtime(&self) -> Result<tokio::runtime::Runtime, CliError> {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("geotrigger")
            .build()
            .map_err(|e| CliError::Runtime(format!("Failed to create runtime: {}", e)))
    }
}

/// Explicit path wins, then the per-user default.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    explicit.map(Path::to_path_buf).or_else(default_config_path)
}
