//! Trigger flusher over HTTP.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::{BasicAuth, HttpClient, HttpError, ReqwestClient};
use crate::condition::Category;
use crate::config::ServiceConfig;
use crate::trigger::{FlushError, FlushRecord, Flusher, TriggerQueueEntry};
use crate::BoxFuture;

/// JSON body posted to `{url}/results`.
#[derive(Debug, Serialize)]
struct ResultBatch<'a> {
    category: &'a str,
    entries: Vec<FlushRecord>,
}

/// Posts flushed batches to `{url}/results`.
pub struct HttpFlusher {
    client: Arc<dyn HttpClient>,
    url: String,
    auth: Option<BasicAuth>,
}

impl std::fmt::Debug for HttpFlusher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFlusher")
            .field("url", &self.url)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

impl HttpFlusher {
    pub fn new(config: &ServiceConfig) -> Result<Self, FlushError> {
        config.validate()?;
        let client = ReqwestClient::with_timeout(config.timeout())
            .map_err(|e| FlushError::Transport(e.to_string()))?;
        Self::with_client(config, Arc::new(client))
    }

    pub fn with_client(config: &ServiceConfig, client: Arc<dyn HttpClient>) -> Result<Self, FlushError> {
        config.validate()?;
        Ok(Self {
            client,
            url: format!("{}/results", config.base_url()?),
            auth: BasicAuth::from_config(config),
        })
    }
}

impl Flusher for HttpFlusher {
    fn flush<'a>(
        &'a self,
        category: &'a Category,
        batch: &'a [TriggerQueueEntry],
    ) -> BoxFuture<'a, Result<(), FlushError>> {
        Box::pin(async move {
            let body = serde_json::to_vec(&ResultBatch {
                category: category.as_str(),
                entries: batch.iter().map(FlushRecord::from).collect(),
            })
            .map_err(|e| FlushError::Encode(e.to_string()))?;

            debug!(url = %self.url, entries = batch.len(), "Posting results");
            self.client
                .post_json(&self.url, body, self.auth.as_ref())
                .await
                .map(|_| ())
                .map_err(|e| match e {
                    HttpError::Status { status, body, .. } => FlushError::Rejected {
                        status,
                        message: body,
                    },
                    HttpError::Transport(message) => FlushError::Transport(message),
                })
        })
    }
}
