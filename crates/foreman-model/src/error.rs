//! Error types for the model client.

use thiserror::Error;

/// Errors that can occur while talking to the model.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Transport-level failure (connection, TLS, timeout).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("Model API returned status {code}: {body}")]
    Status { code: u16, body: String },

    /// The API answered without any choice content.
    #[error("Model API returned no content")]
    EmptyResponse,

    /// A scripted model ran out of replies.
    #[error("Scripted model has no more replies")]
    ScriptExhausted,

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Status { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}
