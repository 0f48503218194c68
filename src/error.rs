//! Error types for entity resolution
//!
//! Errors are classified by recoverability:
//! - Transient: rate limits, timeouts, server errors, dropped connections
//! - Fatal: malformed queries, auth failures, undecodable responses
//! - Usage: bad input handed to the library (empty name, bad language tag)

use std::time::Duration;

use thiserror::Error;

/// Error types for query execution and resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    // Transient errors
    #[error("Query service rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Query timed out: {0}")]
    Timeout(String),

    #[error("Query service error {status}")]
    ServerError {
        status: u16,
        retry_after: Option<Duration>,
    },

    #[error("Network error: {0}")]
    Network(String),

    // Fatal errors
    #[error("Query rejected with status {status}: {message}")]
    BadRequest { status: u16, message: String },

    #[error("Query service refused access ({status})")]
    Unauthorized { status: u16 },

    #[error("Failed to decode query response: {0}")]
    Decode(String),

    #[error("Worker task failed: {0}")]
    Worker(String),

    // Usage errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Coarse class of a [`ResolveError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    Transient,
    Fatal,
    Usage,
}

impl ResolveError {
    /// Returns true if this error is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ResolveError::RateLimited { .. }
                | ResolveError::Timeout(_)
                | ResolveError::ServerError { .. }
                | ResolveError::Network(_)
        )
    }

    pub fn class(&self) -> ErrorClass {
        if self.is_retryable() {
            ErrorClass::Transient
        } else {
            match self {
                ResolveError::InvalidInput(_) | ResolveError::Configuration(_) => {
                    ErrorClass::Usage
                }
                _ => ErrorClass::Fatal,
            }
        }
    }

    /// Server-provided cool-down, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ResolveError::RateLimited { retry_after }
            | ResolveError::ServerError { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ResolveError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ResolveError::Timeout(err.to_string())
        } else if err.is_decode() {
            ResolveError::Decode(err.to_string())
        } else if err.is_builder() {
            ResolveError::InvalidInput(err.to_string())
        } else {
            ResolveError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ResolveError {
    fn from(err: serde_json::Error) -> Self {
        ResolveError::Decode(err.to_string())
    }
}
