//! # VectorStore
//!
//! Read-only access to the Pinecone index that holds exam questions and their
//! worked answers.
//!
//! The router talks to the index through the [`VectorIndex`] trait so tests can
//! swap in a fake; [`PineconeIndex`] is the production implementation over the
//! Pinecone REST data plane.
//!
//! ## Record layout
//! Each record carries metadata along these lines:
//!
//! ```json
//! { "exam": 1, "section": "Matemáticas", "question": 3, "text": "..." }
//! ```
//!
//! The snippet shown to the student is `text`, or `answer` for older records.
//!
//! ## Filter-only queries
//! Pinecone requires a vector (or a record id) on every query, even when the
//! caller only wants a metadata filter. [`IndexQuery::filter_only`] sends a
//! placeholder unit vector of the index dimension; the filter alone decides
//! which record comes back. All-zero vectors are rejected by the service, hence
//! the single `1.0`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};
use tracing::{debug, info};

use crate::error::{UpstreamError, check_status};
use crate::submission::Selector;

const SERVICE: &str = "pinecone";
const API_VERSION: &str = "2024-07";

/// Payload of a `POST /query` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexQuery {
    pub vector: Vec<f32>,
    pub top_k: u32,
    pub include_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<JsonValue>,
}

impl IndexQuery {
    /// Nearest-neighbour query for an embedding.
    pub fn similar_to(vector: Vec<f32>, top_k: u32) -> Self {
        IndexQuery {
            vector,
            top_k,
            include_metadata: true,
            filter: None,
        }
    }

    /// Exact lookup of one exam question by metadata.
    pub fn filter_only(selector: &Selector, dimension: usize) -> Self {
        IndexQuery {
            vector: placeholder_vector(dimension),
            top_k: 1,
            include_metadata: true,
            filter: Some(json!({
                "exam": selector.exam,
                "section": selector.section.as_str(),
                "question": selector.question,
            })),
        }
    }
}

fn placeholder_vector(dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0; dimension.max(1)];
    vector[0] = 1.0;
    vector
}

/// One hit returned by the index.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct Match {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default)]
    pub metadata: Option<Map<String, JsonValue>>,
}

impl Match {
    /// The snippet stored with this record: `text`, else `answer`.
    ///
    /// Empty strings count as missing.
    pub fn snippet_text(&self) -> Option<&str> {
        let metadata = self.metadata.as_ref()?;
        ["text", "answer"]
            .iter()
            .filter_map(|key| metadata.get(*key).and_then(JsonValue::as_str))
            .find(|value| !value.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<Match>,
}

#[derive(Debug, Deserialize)]
struct DescribeIndexResponse {
    host: String,
}

/// Anything that can answer an [`IndexQuery`].
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn query(&self, query: &IndexQuery) -> Result<Vec<Match>, UpstreamError>;
}

/// Pinecone REST client bound to one index host.
#[derive(Debug, Clone)]
pub struct PineconeIndex {
    client: Client,
    host: String,
    api_key: String,
}

fn with_scheme(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

impl PineconeIndex {
    /// Client for a known data-plane host (`my-index-abc123.svc.pinecone.io`).
    pub fn new(client: Client, host: &str, api_key: impl Into<String>) -> Self {
        PineconeIndex {
            client,
            host: with_scheme(host),
            api_key: api_key.into(),
        }
    }

    /// Look up the data-plane host of `index` through the control plane.
    pub async fn connect(
        client: Client,
        controller: &str,
        index: &str,
        api_key: impl Into<String>,
    ) -> Result<Self, UpstreamError> {
        let api_key = api_key.into();
        let url = format!("{}/indexes/{index}", with_scheme(controller));
        debug!("Describing Pinecone index at {url}");

        let response = client
            .get(&url)
            .header("Api-Key", &api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .send()
            .await
            .map_err(UpstreamError::http(SERVICE))?;
        let described: DescribeIndexResponse = check_status(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(UpstreamError::http(SERVICE))?;

        info!("Resolved Pinecone index {index} to {}", described.host);
        Ok(PineconeIndex::new(client, &described.host, api_key))
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn query(&self, query: &IndexQuery) -> Result<Vec<Match>, UpstreamError> {
        debug!(
            top_k = query.top_k,
            filter = ?query.filter,
            "Querying Pinecone"
        );

        let response = self
            .client
            .post(format!("{}/query", self.host))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(query)
            .send()
            .await
            .map_err(UpstreamError::http(SERVICE))?;

        let body: QueryResponse = check_status(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(UpstreamError::http(SERVICE))?;

        Ok(body.matches)
    }
}
