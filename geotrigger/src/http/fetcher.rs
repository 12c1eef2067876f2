//! Condition fetcher over HTTP.

use std::sync::Arc;

use chrono::SecondsFormat;
use tracing::debug;

use super::{BasicAuth, HttpClient, HttpError, ReqwestClient};
use crate::condition::ConditionRecord;
use crate::config::{ConfigError, ServiceConfig};
use crate::refresh::{FetchError, FetchRequest, Fetcher};
use crate::BoxFuture;

/// Fetches conditions with `GET {url}/conditions`.
///
/// The response body must be a JSON array of [`ConditionRecord`]s.
pub struct HttpFetcher {
    client: Arc<dyn HttpClient>,
    base_url: String,
    auth: Option<BasicAuth>,
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("base_url", &self.base_url)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

impl HttpFetcher {
    /// Fetcher using a reqwest client configured from `config`.
    pub fn new(config: &ServiceConfig) -> Result<Self, FetchError> {
        config.validate()?;
        let client = ReqwestClient::with_timeout(config.timeout())
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Self::with_client(config, Arc::new(client))
    }

    /// Fetcher using the given client.
    pub fn with_client(config: &ServiceConfig, client: Arc<dyn HttpClient>) -> Result<Self, FetchError> {
        config.validate()?;
        Ok(Self {
            client,
            base_url: config.base_url()?.to_string(),
            auth: BasicAuth::from_config(config),
        })
    }

    fn url_for(&self, request: &FetchRequest) -> String {
        let mut params = Vec::new();
        if let Some(point) = request.around {
            params.push(format!("lat={:.6}", point.latitude));
            params.push(format!("lon={:.6}", point.longitude));
        }
        if let Some(since) = request.since {
            params.push(format!(
                "since={}",
                since.to_rfc3339_opts(SecondsFormat::Secs, true)
            ));
        }
        if params.is_empty() {
            format!("{}/conditions", self.base_url)
        } else {
            format!("{}/conditions?{}", self.base_url, params.join("&"))
        }
    }
}

fn fetch_error(error: HttpError) -> FetchError {
    if error.is_unauthorized() {
        FetchError::InvalidConfiguration(ConfigError::Invalid(format!(
            "service rejected credentials ({})",
            error
        )))
    } else {
        FetchError::Transport(error.to_string())
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, Result<Vec<ConditionRecord>, FetchError>> {
        Box::pin(async move {
            let url = self.url_for(&request);
            debug!(url = %url, "Requesting conditions");
            let body = self
                .client
                .get(&url, self.auth.as_ref())
                .await
                .map_err(fetch_error)?;
            serde_json::from_slice(&body).map_err(|e| FetchError::Decode(e.to_string()))
        })
    }
}
