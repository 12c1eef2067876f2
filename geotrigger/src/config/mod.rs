//! Engine and service configuration.
//!
//! [`EngineConfig`] carries every tunable of the engine with the documented
//! defaults; [`ServiceConfig`] describes the remote condition service used by
//! the HTTP collaborators. Both can be loaded from an INI file:
//!
//! ```text
//! [engine]
//! max_retrieval_range_m = 5000
//! refresh_interval_secs = 30
//! time_filtered_refresh = true
//! self_origin_suppression = true
//! local_identity = user-42
//! bearing_cone_half_width_deg = 60
//! lookahead_secs = 20
//! default_distance_threshold_m = 200
//! location_channel_capacity = 64
//!
//! [service]
//! url = https://conditions.example.org/api
//! username = user-42
//! password = secret
//! timeout_secs = 30
//! ```
//!
//! Missing keys keep their defaults. Unknown keys are ignored.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::geo::{
    ThresholdPolicy, DEFAULT_BEARING_CONE_HALF_WIDTH_DEG, DEFAULT_DISTANCE_THRESHOLD_M,
    DEFAULT_LOOKAHEAD_SECS,
};

/// Conditions farther than this (meters) are dropped from the cache.
pub const DEFAULT_MAX_RETRIEVAL_RANGE_M: f64 = 5000.0;

/// Default period between condition refreshes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Default capacity of the location channel feeding the evaluator.
pub const DEFAULT_LOCATION_CHANNEL_CAPACITY: usize = 64;

/// Default HTTP timeout for service calls, in seconds.
pub const DEFAULT_SERVICE_TIMEOUT_SECS: u64 = 30;

const ENGINE_SECTION: &str = "engine";
const SERVICE_SECTION: &str = "service";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read or written.
    #[error("config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid INI.
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// A key holds a value of the wrong type.
    #[error("invalid value for [{section}] {key}: '{value}'")]
    InvalidValue {
        section: &'static str,
        key: &'static str,
        value: String,
    },

    /// Values parsed but are not usable together.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Tunables of the proximity engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Conditions anchored farther than this (meters) are evicted.
    pub max_retrieval_range: f64,
    /// Period between refreshes.
    pub refresh_interval: Duration,
    /// Only ask for conditions created since the last successful fetch.
    pub time_filtered_refresh: bool,
    /// Drop fetched conditions owned by `local_identity`. Off by default;
    /// turning it on requires an identity.
    pub self_origin_suppression: bool,
    /// Identity of the local user.
    pub local_identity: Option<String>,
    /// Half width of the "ahead" cone in degrees.
    pub bearing_cone_half_width: f64,
    /// Look-ahead time in seconds for the default distance threshold.
    pub lookahead_seconds: f64,
    /// Distance threshold in meters while stationary.
    pub default_distance_threshold: f64,
    /// Samples buffered between location source and evaluator.
    pub location_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retrieval_range: DEFAULT_MAX_RETRIEVAL_RANGE_M,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            time_filtered_refresh: true,
            self_origin_suppression: false,
            local_identity: None,
            bearing_cone_half_width: DEFAULT_BEARING_CONE_HALF_WIDTH_DEG,
            lookahead_seconds: DEFAULT_LOOKAHEAD_SECS,
            default_distance_threshold: DEFAULT_DISTANCE_THRESHOLD_M,
            location_channel_capacity: DEFAULT_LOCATION_CHANNEL_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn with_max_retrieval_range(mut self, meters: f64) -> Self {
        self.max_retrieval_range = meters;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_time_filtered_refresh(mut self, enabled: bool) -> Self {
        self.time_filtered_refresh = enabled;
        self
    }

    pub fn with_self_origin_suppression(mut self, enabled: bool) -> Self {
        self.self_origin_suppression = enabled;
        self
    }

    pub fn with_local_identity(mut self, identity: impl Into<String>) -> Self {
        self.local_identity = Some(identity.into());
        self
    }

    pub fn with_bearing_cone_half_width(mut self, degrees: f64) -> Self {
        self.bearing_cone_half_width = degrees;
        self
    }

    pub fn with_lookahead_seconds(mut self, seconds: f64) -> Self {
        self.lookahead_seconds = seconds;
        self
    }

    pub fn with_default_distance_threshold(mut self, meters: f64) -> Self {
        self.default_distance_threshold = meters;
        self
    }

    pub fn with_location_channel_capacity(mut self, capacity: usize) -> Self {
        self.location_channel_capacity = capacity;
        self
    }

    /// Threshold policy for anchor/radius conditions.
    pub fn threshold_policy(&self) -> ThresholdPolicy {
        ThresholdPolicy {
            default_distance_m: self.default_distance_threshold,
            lookahead_secs: self.lookahead_seconds,
        }
    }

    /// Identity used for self-origin suppression, if suppression is on.
    pub fn suppressed_identity(&self) -> Option<&str> {
        if self.self_origin_suppression {
            self.local_identity.as_deref()
        } else {
            None
        }
    }

    /// Check that the values are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.max_retrieval_range.is_finite() && self.max_retrieval_range >= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "max retrieval range must be at least 1 m, got {}",
                self.max_retrieval_range
            )));
        }
        if self.refresh_interval < Duration::from_secs(1) {
            return Err(ConfigError::Invalid(format!(
                "refresh interval must be at least 1 s, got {:?}",
                self.refresh_interval
            )));
        }
        if !(self.bearing_cone_half_width > 0.0 && self.bearing_cone_half_width <= 180.0) {
            return Err(ConfigError::Invalid(format!(
                "bearing cone half width must be in (0, 180], got {}",
                self.bearing_cone_half_width
            )));
        }
        if !(self.lookahead_seconds.is_finite() && self.lookahead_seconds > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "lookahead must be positive, got {}",
                self.lookahead_seconds
            )));
        }
        if !(self.default_distance_threshold.is_finite() && self.default_distance_threshold > 0.0)
        {
            return Err(ConfigError::Invalid(format!(
                "default distance threshold must be positive, got {}",
                self.default_distance_threshold
            )));
        }
        if self.location_channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "location channel capacity must be at least 1".to_string(),
            ));
        }
        if self.self_origin_suppression
            && self
                .local_identity
                .as_deref()
                .map_or(true, |id| id.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "self-origin suppression requires a local identity".to_string(),
            ));
        }
        Ok(())
    }

    /// Load only the `[engine]` section of an INI file.
    pub fn from_ini_file(path: &Path) -> Result<Self, ConfigError> {
        Ok(ConfigFile::load(path)?.engine)
    }
}

/// Endpoint and credentials of the condition service.
#[derive(Clone, PartialEq)]
pub struct ServiceConfig {
    /// Base URL, e.g. `https://host/api`.
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            password: None,
            timeout_secs: DEFAULT_SERVICE_TIMEOUT_SECS,
        }
    }
}

// Keeps the password out of logs.
impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl ServiceConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Base URL without a trailing slash.
    ///
    /// Fails if the URL is missing or not http(s).
    pub fn base_url(&self) -> Result<&str, ConfigError> {
        let url = self
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ConfigError::Invalid("service url is not set".to_string()))?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "service url must start with http:// or https://, got '{}'",
                url
            )));
        }
        Ok(url.trim_end_matches('/'))
    }

    /// Check that an HTTP collaborator can be built from this config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "service timeout must be at least 1 s".to_string(),
            ));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(ConfigError::Invalid(
                "username and password must be set together".to_string(),
            ));
        }
        Ok(())
    }
}

/// Contents of a config file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFile {
    pub engine: EngineConfig,
    pub service: ServiceConfig,
}

impl ConfigFile {
    /// Load from `path`. Values are parsed but not validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ini_str(&text)
    }

    /// Load from `path` if it exists, otherwise return defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let mut file = Self::default();

        if let Some(section) = ini.section(Some(ENGINE_SECTION)) {
            let engine = &mut file.engine;
            let get = |key: &'static str| section.get(key).map(str::trim);

            if let Some(v) = get("max_retrieval_range_m") {
                engine.max_retrieval_range = parse_value(ENGINE_SECTION, "max_retrieval_range_m", v)?;
            }
            if let Some(v) = get("refresh_interval_secs") {
                let secs: u64 = parse_value(ENGINE_SECTION, "refresh_interval_secs", v)?;
                engine.refresh_interval = Duration::from_secs(secs);
            }
            if let Some(v) = get("time_filtered_refresh") {
                engine.time_filtered_refresh = parse_bool(ENGINE_SECTION, "time_filtered_refresh", v)?;
            }
            if let Some(v) = get("self_origin_suppression") {
                engine.self_origin_suppression =
                    parse_bool(ENGINE_SECTION, "self_origin_suppression", v)?;
            }
            if let Some(v) = get("local_identity").filter(|v| !v.is_empty()) {
                engine.local_identity = Some(v.to_string());
            }
            if let Some(v) = get("bearing_cone_half_width_deg") {
                engine.bearing_cone_half_width =
                    parse_value(ENGINE_SECTION, "bearing_cone_half_width_deg", v)?;
            }
            if let Some(v) = get("lookahead_secs") {
                engine.lookahead_seconds = parse_value(ENGINE_SECTION, "lookahead_secs", v)?;
            }
            if let Some(v) = get("default_distance_threshold_m") {
                engine.default_distance_threshold =
                    parse_value(ENGINE_SECTION, "default_distance_threshold_m", v)?;
            }
            if let Some(v) = get("location_channel_capacity") {
                engine.location_channel_capacity =
                    parse_value(ENGINE_SECTION, "location_channel_capacity", v)?;
            }
        }

        if let Some(section) = ini.section(Some(SERVICE_SECTION)) {
            let service = &mut file.service;
            let text = |key: &str| {
                section
                    .get(key)
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
            };
            service.url = text("url");
            service.username = text("username");
            service.password = text("password");
            if let Some(v) = section.get("timeout_secs").map(str::trim) {
                service.timeout_secs = parse_value(SERVICE_SECTION, "timeout_secs", v)?;
            }
        }

        Ok(file)
    }

    /// Render as INI text. The password is written as-is.
    pub fn to_ini_string(&self) -> String {
        let mut ini = Ini::new();
        let engine = &self.engine;
        ini.with_section(Some(ENGINE_SECTION))
            .set("max_retrieval_range_m", engine.max_retrieval_range.to_string())
            .set(
                "refresh_interval_secs",
                engine.refresh_interval.as_secs().to_string(),
            )
            .set("time_filtered_refresh", engine.time_filtered_refresh.to_string())
            .set(
                "self_origin_suppression",
                engine.self_origin_suppression.to_string(),
            )
            .set(
                "local_identity",
                engine.local_identity.clone().unwrap_or_default(),
            )
            .set(
                "bearing_cone_half_width_deg",
                engine.bearing_cone_half_width.to_string(),
            )
            .set("lookahead_secs", engine.lookahead_seconds.to_string())
            .set(
                "default_distance_threshold_m",
                engine.default_distance_threshold.to_string(),
            )
            .set(
                "location_channel_capacity",
                engine.location_channel_capacity.to_string(),
            );

        let service = &self.service;
        ini.with_section(Some(SERVICE_SECTION))
            .set("url", service.url.clone().unwrap_or_default())
            .set("username", service.username.clone().unwrap_or_default())
            .set("password", service.password.clone().unwrap_or_default())
            .set("timeout_secs", service.timeout_secs.to_string());

        let mut out = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = ini.write_to(&mut out);
        String::from_utf8_lossy(&out).into_owned()
    }

    /// Write to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, self.to_ini_string()).map_err(io_err)
    }
}

/// Default config file location (`<config dir>/geotrigger/config.ini`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("geotrigger").join("config.ini"))
}

fn parse_value<T: FromStr>(
    section: &'static str,
    key: &'static str,
    raw: &str,
) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        section,
        key,
        value: raw.to_string(),
    })
}

fn parse_bool(section: &'static str, key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            section,
            key,
            value: raw.to_string(),
        }),
    }
}
