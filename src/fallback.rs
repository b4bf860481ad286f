//! Last-resort snippet source: a random encyclopedia summary.
//!
//! Used when neither the exact nor the similarity lookup produced anything.
//! The call runs with a short fixed timeout and is never retried.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{UpstreamError, check_status};
use crate::router::Snippet;

const SERVICE: &str = "wikipedia";

/// Shown when the summary comes back without an `extract`.
pub const MISSING_EXTRACT: &str = "Lo siento, nada";

#[async_trait]
pub trait ReferenceSource: Send + Sync {
    async fn random_snippet(&self) -> Result<Snippet, UpstreamError>;
}

#[derive(Debug, Deserialize)]
struct Summary {
    extract: Option<String>,
}

/// Client for the Wikipedia REST `page/random/summary` endpoint.
#[derive(Debug, Clone)]
pub struct RandomSummary {
    client: Client,
    url: String,
    timeout: Duration,
}

impl RandomSummary {
    pub fn new(client: Client, url: impl Into<String>, timeout: Duration) -> Self {
        RandomSummary {
            client,
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ReferenceSource for RandomSummary {
    async fn random_snippet(&self) -> Result<Snippet, UpstreamError> {
        debug!("Fetching random summary from {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(UpstreamError::http(SERVICE))?;

        let summary: Summary = check_status(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(UpstreamError::http(SERVICE))?;
        Ok(Snippet::new(
            summary.extract.unwrap_or_else(|| MISSING_EXTRACT.to_string()),
        ))
    }
}
