//! HTTP implementations of the fetch and flush boundaries.
//!
//! Requests go through the [`HttpClient`] trait so tests can inject a mock.
//!
//! ```text
//! HttpFetcher  ── GET  {url}/conditions?lat=&lon=&since= ──► service
//! HttpFlusher  ── POST {url}/results  (JSON batch)        ──► service
//! ```

mod fetcher;
mod flusher;

pub use fetcher::HttpFetcher;
pub use flusher::HttpFlusher;

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::config::ServiceConfig;
use crate::BoxFuture;

/// HTTP-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    /// Request could not be sent or the response not read.
    #[error("request failed: {0}")]
    Transport(String),

    /// Service answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },
}

impl HttpError {
    /// Whether the service rejected the credentials.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, HttpError::Status { status: 401 | 403, .. })
    }
}

/// Basic-auth credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl BasicAuth {
    pub(crate) fn from_config(config: &ServiceConfig) -> Option<Self> {
        match (&config.username, &config.password) {
            (Some(username), Some(password)) => Some(Self {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }
}

/// Trait for HTTP client operations.
///
/// Allows injecting a mock client in tests.
pub trait HttpClient: Send + Sync {
    /// GET `url`, returning the response body.
    fn get<'a>(
        &'a self,
        url: &'a str,
        auth: Option<&'a BasicAuth>,
    ) -> BoxFuture<'a, Result<Vec<u8>, HttpError>>;

    /// POST `body` as JSON to `url`, returning the response body.
    fn post_json<'a>(
        &'a self,
        url: &'a str,
        body: Vec<u8>,
        auth: Option<&'a BasicAuth>,
    ) -> BoxFuture<'a, Result<Vec<u8>, HttpError>>;
}

/// Real HTTP client implementation using reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a new ReqwestClient with the given request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("geotrigger/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HttpError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn send(
        url: &str,
        request: reqwest::RequestBuilder,
        auth: Option<&BasicAuth>,
    ) -> Result<Vec<u8>, HttpError> {
        let request = match auth {
            Some(auth) => request.basic_auth(&auth.username, Some(&auth.password)),
            None => request,
        };
        let response = request
            .send()
            .await
            .map_err(|e| HttpError::Transport(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| HttpError::Transport(format!("Failed to read response: {}", e)))
    }
}

impl HttpClient for ReqwestClient {
    fn get<'a>(
        &'a self,
        url: &'a str,
        auth: Option<&'a BasicAuth>,
    ) -> BoxFuture<'a, Result<Vec<u8>, HttpError>> {
        Box::pin(Self::send(url, self.client.get(url), auth))
    }

    fn post_json<'a>(
        &'a self,
        url: &'a str,
        body: Vec<u8>,
        auth: Option<&'a BasicAuth>,
    ) -> BoxFuture<'a, Result<Vec<u8>, HttpError>> {
        let request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        Box::pin(Self::send(url, request, auth))
    }
}
