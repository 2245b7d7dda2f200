//! Error types for tracksync
//!
//! Defines the error enum covering every failure mode of the sync core.
//! Uses thiserror for ergonomic error handling.

use crate::integrations::retry::{RetryDecision, RetryableError};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for tracksync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Comprehensive error type for tracksync operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Mapping store errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// SQLite database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A tracker API answered with a non-success status
    #[error("{system} API error: HTTP {status}: {message}")]
    Remote {
        system: &'static str,
        status: u16,
        message: String,
    },

    /// Rate limited, with the `Retry-After` seconds when the tracker sent them
    #[error("{system} rate limited (HTTP 429)")]
    RateLimited {
        system: &'static str,
        retry_after: Option<u64>,
    },

    /// Network errors that never produced a response
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Webhook payload could not be decoded into a known shape
    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl SyncError {
    /// Build a remote error for the given tracker
    pub fn remote(system: &'static str, status: u16, message: impl Into<String>) -> Self {
        SyncError::Remote {
            system,
            status,
            message: message.into(),
        }
    }

    /// HTTP status carried by this error, if it came from a tracker response
    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::Remote { status, .. } => Some(*status),
            SyncError::RateLimited { .. } => Some(429),
            SyncError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// True when the tracker reported the referenced entity as missing
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Classify an HTTP status for retry eligibility
///
/// | status | decision |
/// |---|---|
/// | 401, 403 | no retry |
/// | 408, 429 | retry |
/// | other 4xx | no retry |
/// | 5xx | retry |
pub fn classify_status(status: u16) -> RetryDecision {
    match status {
        401 | 403 => RetryDecision::NoRetry,
        408 | 429 => RetryDecision::Retry,
        400..=499 => RetryDecision::NoRetry,
        500..=599 => RetryDecision::Retry,
        _ => RetryDecision::NoRetry,
    }
}

impl RetryableError for SyncError {
    fn retry_decision(&self) -> RetryDecision {
        match self {
            SyncError::Remote { status, .. } => classify_status(*status),
            SyncError::RateLimited { retry_after, .. } => match retry_after {
                Some(secs) => RetryDecision::RetryAfter(Duration::from_secs(*secs)),
                None => RetryDecision::Retry,
            },
            SyncError::Network(_) => RetryDecision::Retry,
            SyncError::Http(e) => {
                if let Some(status) = e.status() {
                    classify_status(status.as_u16())
                } else if e.is_decode() || e.is_builder() {
                    RetryDecision::NoRetry
                } else {
                    // connect, timeout, body and request errors never reached a status
                    RetryDecision::Retry
                }
            }
            // Non-retryable errors
            SyncError::Config(_) => RetryDecision::NoRetry,
            SyncError::Storage(_) => RetryDecision::NoRetry,
            SyncError::Database(_) => RetryDecision::NoRetry,
            SyncError::Json(_) => RetryDecision::NoRetry,
            SyncError::Yaml(_) => RetryDecision::NoRetry,
            SyncError::Io(_) => RetryDecision::NoRetry,
            SyncError::InvalidPayload(_) => RetryDecision::NoRetry,
            SyncError::Other(_) => RetryDecision::NoRetry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status(401), RetryDecision::NoRetry);
        assert_eq!(classify_status(403), RetryDecision::NoRetry);
        assert_eq!(classify_status(404), RetryDecision::NoRetry);
        assert_eq!(classify_status(422), RetryDecision::NoRetry);
        assert_eq!(classify_status(408), RetryDecision::Retry);
        assert_eq!(classify_status(429), RetryDecision::Retry);
        assert_eq!(classify_status(500), RetryDecision::Retry);
        assert_eq!(classify_status(503), RetryDecision::Retry);
    }

    #[test]
    fn test_remote_error_decision() {
        let err = SyncError::remote("GitHub", 502, "bad gateway");
        assert_eq!(err.retry_decision(), RetryDecision::Retry);
        assert_eq!(err.status(), Some(502));

        let err = SyncError::remote("Jira", 403, "forbidden");
        assert_eq!(err.retry_decision(), RetryDecision::NoRetry);
    }

    #[test]
    fn test_rate_limited_uses_retry_after() {
        let err = SyncError::RateLimited {
            system: "Jira",
            retry_after: Some(7),
        };
        assert_eq!(
            err.retry_decision(),
            RetryDecision::RetryAfter(Duration::from_secs(7))
        );
        assert_eq!(err.status(), Some(429));

        // no header: fall back to the configured schedule
        let err = SyncError::RateLimited {
            system: "GitHub",
            retry_after: None,
        };
        assert_eq!(err.retry_decision(), RetryDecision::Retry);
    }

    #[test]
    fn test_local_errors_are_terminal() {
        assert_eq!(
            SyncError::Storage("disk full".into()).retry_decision(),
            RetryDecision::NoRetry
        );
        assert_eq!(
            SyncError::Network("reset".into()).retry_decision(),
            RetryDecision::Retry
        );
    }

    #[test]
    fn test_not_found_detection() {
        assert!(SyncError::remote("Jira", 404, "gone").is_not_found());
        assert!(!SyncError::remote("Jira", 400, "bad").is_not_found());
        assert!(!SyncError::Other("x".into()).is_not_found());
    }
}
