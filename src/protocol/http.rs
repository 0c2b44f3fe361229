//! HTTP REST API Protocol
//!
//! JSON bodies for the embedding endpoints:
//! - `POST /embed` with `{"query": "..."}` or `{"query": ["...", ...]}`
//! - `POST /embed/batch` with `["...", ...]`
//! - Response body: `{"embeddings": [...], "dimension": N, "count": N}`

use serde::{Deserialize, Serialize};

use crate::models::{EmbedInput, EmbedOutput};

/// HTTP Embedding Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpEmbedRequest {
    /// Single query string or list of query strings
    pub query: EmbedInput,
}

impl HttpEmbedRequest {
    /// Validate the request
    pub fn validate(&self) -> Result<(), HttpErrorResponse> {
        validate_input(&self.query)
    }
}

/// Reject inputs the embedding core should never see.
pub fn validate_input(input: &EmbedInput) -> Result<(), HttpErrorResponse> {
    match input {
        EmbedInput::Batch(texts) if texts.is_empty() => Err(HttpErrorResponse::empty_query()),
        _ => Ok(()),
    }
}

/// HTTP Embedding Response
///
/// `embeddings` is a flat vector for a single query and a list of vectors
/// otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpEmbedResponse {
    pub embeddings: EmbedOutput,
    pub dimension: usize,
    pub count: usize,
}

impl HttpEmbedResponse {
    /// Create a new response
    pub fn new(embeddings: EmbedOutput) -> Self {
        Self {
            dimension: embeddings.dimension().unwrap_or(0),
            count: embeddings.count(),
            embeddings,
        }
    }
}

/// HTTP Error Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpErrorResponse {
    /// Error message
    pub error: String,

    /// Error code (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Additional details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl HttpErrorResponse {
    /// Create a new error response
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
            details: None,
        }
    }

    /// Create error with code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Create error with details
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Create empty query list error
    pub fn empty_query() -> Self {
        Self::new("Query list cannot be empty").with_code("EMPTY_QUERY")
    }

    /// Create invalid body error
    pub fn invalid_body(details: impl Into<String>) -> Self {
        Self::new("Invalid request body")
            .with_code("INVALID_REQUEST")
            .with_details(details)
    }

    /// Create model not ready error
    pub fn model_not_ready() -> Self {
        Self::new("Service not initialized").with_code("MODEL_NOT_READY")
    }

    /// Create internal error
    pub fn internal_error(details: impl Into<String>) -> Self {
        Self::new("Error generating embeddings")
            .with_code("INTERNAL_ERROR")
            .with_details(details)
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
    pub device: String,
    pub embedding_dimension: usize,
}

impl HealthResponse {
    pub fn healthy(model: impl Into<String>, device: impl Into<String>, dimension: usize) -> Self {
        Self {
            status: "healthy".to_string(),
            model: model.into(),
            device: device.into(),
            embedding_dimension: dimension,
        }
    }
}
