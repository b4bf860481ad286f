//! # Error types
//!
//! Three layers of failure show up while answering a question:
//!
//! - [`UpstreamError`]: something went wrong talking to a collaborator
//!   (Pinecone, the OpenAI-compatible API, Wikipedia).
//! - [`LookupError`]: the outcome of a retrieval tier that found nothing.
//!   `NotFound` and `Transient` both let the router fall through to the next
//!   tier, but they stay distinct so callers (and tests) can tell an empty
//!   index from a broken one.
//! - [`AsesorError`]: what the user finally sees. Each variant maps to an HTTP
//!   status and a Spanish message through [`axum::response::IntoResponse`].

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Errors returned to the person asking the question.
#[derive(Debug, Error)]
pub enum AsesorError {
    /// Malformed, missing or conflicting form input. Always raised before any
    /// network call is made.
    #[error("{0}")]
    Validation(String),

    /// The embedding service failed while building the similarity query.
    #[error("Error de embeddings: {0}")]
    Embedding(String),

    /// The chat completion service failed while formatting the answer.
    #[error("Error de formateo: {0}")]
    Formatting(String),

    /// Every retrieval tier came back empty and the fallback fetch failed.
    #[error("No hay datos en Pinecone y falló la búsqueda aleatoria.")]
    ExhaustedFallback,
}

impl AsesorError {
    pub fn validation(message: impl Into<String>) -> Self {
        AsesorError::Validation(message.into())
    }

    /// HTTP status code used when this error is sent back to the browser.
    pub fn status(&self) -> StatusCode {
        match self {
            AsesorError::Validation(_) => StatusCode::BAD_REQUEST,
            AsesorError::Embedding(_)
            | AsesorError::Formatting(_)
            | AsesorError::ExhaustedFallback => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AsesorError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Outcome of a retrieval tier that produced no snippets.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("no matching records")]
    NotFound,

    #[error("vector store unavailable: {0}")]
    Transient(#[from] UpstreamError),
}

impl LookupError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LookupError::NotFound)
    }
}

/// Failures talking to an external collaborator.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request to {service} failed: {source}")]
    Http {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} answered {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error(transparent)]
    OpenAi(#[from] async_openai::error::OpenAIError),

    #[error("{0} returned an empty response")]
    Empty(&'static str),
}

impl UpstreamError {
    pub(crate) fn http(service: &'static str) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| UpstreamError::Http { service, source }
    }
}

/// Pass a successful response through, or turn it into [`UpstreamError::Status`]
/// carrying the body text.
pub(crate) async fn check_status(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(UpstreamError::Status {
        service,
        status: status.as_u16(),
        body,
    })
}
