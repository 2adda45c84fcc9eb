//! Error types for distance providers, planning and configuration.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Coarse classification of a provider failure, used for breaker and
/// metrics accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Quota,
    Transient,
    Other,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Quota => "quota",
            ErrorKind::Transient => "transient",
            ErrorKind::Other => "other",
        }
    }
}

/// Failure of a single distance provider call.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,

    #[error("transient upstream failure (HTTP {status})")]
    Transient { status: u16 },

    #[error("quota exceeded (HTTP {status})")]
    Quota {
        status: u16,
        retry_after: Option<Duration>,
    },

    #[error("unexpected HTTP status {status}")]
    Http { status: u16 },

    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("invalid response: {0}")]
    Parse(String),

    #[error("routing service answered {code}: {message}")]
    Service { code: String, message: String },

    #[error("at least {required} coordinates required, got {got}")]
    EmptyInput { required: usize, got: usize },

    #[error("circuit open for backend {0}")]
    CircuitOpen(String),
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Timeout => ErrorKind::Timeout,
            ProviderError::Quota { .. } => ErrorKind::Quota,
            ProviderError::Transient { .. } | ProviderError::Network(_) => ErrorKind::Transient,
            _ => ErrorKind::Other,
        }
    }

    /// Whether the same request may be retried immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout | ProviderError::Transient { .. } | ProviderError::Network(_)
        )
    }

    /// Maps an HTTP status to the matching error variant.
    pub fn from_status(status: u16, retry_after: Option<Duration>) -> Self {
        match status {
            402 | 429 => ProviderError::Quota {
                status,
                retry_after,
            },
            502..=504 => ProviderError::Transient { status },
            _ => ProviderError::Http { status },
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if let Some(status) = err.status() {
            ProviderError::from_status(status.as_u16(), None)
        } else if err.is_decode() {
            ProviderError::Parse(err.to_string())
        } else {
            ProviderError::Network(err)
        }
    }
}

/// Hard failures surfaced to callers of the planner.
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("{id} has invalid coordinate ({lat}, {lon})")]
    InvalidCoordinate { id: String, lat: f64, lon: f64 },

    #[error("no stops given")]
    EmptyStops,

    #[error("unsupported sector count {0}, expected 4 or 8")]
    UnsupportedSectorCount(usize),

    #[error("tour {tour} failed validation: missing {missing:?}, unexpected {unexpected:?}")]
    Validation {
        tour: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(ProviderError::from_status(429, None).kind(), ErrorKind::Quota);
        assert_eq!(ProviderError::from_status(402, None).kind(), ErrorKind::Quota);
        assert_eq!(ProviderError::from_status(503, None).kind(), ErrorKind::Transient);
        assert_eq!(ProviderError::from_status(504, None).kind(), ErrorKind::Transient);
        assert_eq!(ProviderError::from_status(500, None).kind(), ErrorKind::Other);
        assert_eq!(ProviderError::from_status(404, None).kind(), ErrorKind::Other);
    }

    #[test]
    fn test_quota_is_not_retryable() {
        let err = ProviderError::from_status(429, Some(Duration::from_secs(30)));
        assert!(!err.is_retryable());
        assert!(ProviderError::Timeout.is_retryable());
        assert!(ProviderError::Transient { status: 502 }.is_retryable());
        assert!(!ProviderError::Http { status: 400 }.is_retryable());
    }
}
