//! Error types for the PINAX engine.

use thiserror::Error;

/// Result type alias using pinax's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for PINAX operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Object-store read or download failed; retryable per PI.
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Model gateway returned non-2xx or an empty response; retryable.
    #[error("LLM error (status {status}): {body}")]
    Llm { status: u16, body: String },

    /// Model returned non-JSON or the wrong shape; retryable.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Upload or CAS append failed after inner retries; terminal for a PI.
    #[error("Publish error: {0}")]
    Publish(String),

    /// Orchestrator unreachable or non-2xx; retried at the chunk level.
    #[error("Callback error: {0}")]
    Callback(String),

    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a per-PI failure with this error should count against the
    /// retry budget and be re-queued, rather than marking the PI terminal.
    ///
    /// Publish failures are terminal because the CAS loop already retried
    /// internally; database and config errors indicate a deployment
    /// problem no retry will fix.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Fetch(_) | Error::Llm { .. } | Error::Parse(_) | Error::Request(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
