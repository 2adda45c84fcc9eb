//! Distance provider contract shared by remote and local backends.

use std::time::Duration;

use serde::Serialize;

use crate::backend::BackendKind;
use crate::error::ProviderError;
use crate::matrix::DistanceMatrix;
use crate::model::Point;
use crate::polyline::Polyline;

/// Result of a route request over an ordered list of points.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSummary {
    pub geometry: Polyline,
    pub distance_m: f64,
    pub duration_s: f64,
}

/// How the backend manager retries a provider's retryable failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Retry `k` (1-based) sleeps `backoff_step * k`.
    pub backoff_step: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_step: Duration::ZERO,
        }
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        self.backoff_step * retry
    }
}

/// Outcome of a health probe against a backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeOutcome {
    /// The backend answered at all.
    pub reachable: bool,
    /// The sample request returned a usable result.
    pub sample_ok: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

/// Computes travel matrices and routes for a list of coordinates.
///
/// Implementations are idempotent. They perform exactly one attempt per
/// call; retries and circuit breaking are the caller's concern.
pub trait DistanceProvider: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn compute_matrix(&self, coords: &[Point]) -> Result<DistanceMatrix, ProviderError>;

    fn compute_route(&self, coords: &[Point]) -> Result<RouteSummary, ProviderError>;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::none()
    }

    fn probe(&self) -> ProbeOutcome;

    /// Base URL for remote backends.
    fn endpoint(&self) -> Option<&str> {
        None
    }
}
