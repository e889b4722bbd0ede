//! Git provider client errors

use thiserror::Error;

/// Errors that can occur when talking to a git provider API
#[derive(Debug, Error)]
pub enum GitProviderError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider API returned an error
    #[error("Git provider API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication failed (invalid or expired token)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request (e.g., unparseable repository URL)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
