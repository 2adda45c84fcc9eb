//! Typed backend registry with one circuit breaker per backend.
//!
//! Backends are tried in priority order. Every attempt goes through the
//! backend's breaker: check `allow()`, release, call, then record exactly one
//! outcome. Retryable failures are retried here with the provider's backoff,
//! so each HTTP attempt is one breaker sample.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::circuit_breaker::{BackendState, BreakerConfig, CircuitBreaker, CircuitState};
use crate::error::ProviderError;
use crate::metrics::RoutingMetrics;
use crate::traits::{DistanceProvider, ProbeOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Self-hosted routing service.
    Osrm,
    /// Public routing instance, used only when enabled.
    OsrmPublic,
    LocalHaversine,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Osrm => "osrm",
            BackendKind::OsrmPublic => "osrm_public",
            BackendKind::LocalHaversine => "local_haversine",
        }
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, BackendKind::LocalHaversine)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Backend {
    provider: Box<dyn DistanceProvider>,
    breaker: CircuitBreaker,
    enabled: bool,
}

/// Operational view of one backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendStatus {
    pub kind: BackendKind,
    pub url: Option<String>,
    pub enabled: bool,
    pub available: bool,
    #[serde(flatten)]
    pub breaker: BackendState,
}

/// Result of `check_backend_health`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendHealth {
    pub kind: BackendKind,
    pub reachable: bool,
    pub sample_ok: bool,
    pub latency_ms: u64,
    pub circuit_state: CircuitState,
    pub error: Option<String>,
}

pub struct BackendManager {
    backends: Vec<Backend>,
    metrics: Arc<RoutingMetrics>,
}

impl fmt::Debug for BackendManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendManager")
            .field("priority", &self.priority())
            .finish()
    }
}

impl BackendManager {
    pub fn new(metrics: Arc<RoutingMetrics>) -> Self {
        Self {
            backends: Vec::new(),
            metrics,
        }
    }

    /// Appends a backend at the lowest priority. A kind registered twice
    /// replaces the earlier entry in place.
    pub fn register(
        &mut self,
        provider: impl DistanceProvider + 'static,
        config: BreakerConfig,
    ) -> &mut Self {
        let kind = provider.kind();
        let backend = Backend {
            breaker: CircuitBreaker::new(kind.as_str(), config).with_metrics(self.metrics.clone()),
            provider: Box::new(provider),
            enabled: true,
        };
        match self.backends.iter_mut().find(|b| b.provider.kind() == kind) {
            Some(slot) => *slot = backend,
            None => self.backends.push(backend),
        }
        self
    }

    pub fn set_enabled(&mut self, kind: BackendKind, enabled: bool) {
        if let Some(backend) = self.find_mut(kind) {
            backend.enabled = enabled;
        }
    }

    /// Registered backends in priority order.
    pub fn priority(&self) -> Vec<BackendKind> {
        self.backends.iter().map(|b| b.provider.kind()).collect()
    }

    /// Enabled remote backends in priority order.
    pub fn remote_priority(&self) -> Vec<BackendKind> {
        self.backends
            .iter()
            .filter(|b| b.enabled && b.provider.kind().is_remote())
            .map(|b| b.provider.kind())
            .collect()
    }

    pub fn has_remote(&self) -> bool {
        self.backends
            .iter()
            .any(|b| b.enabled && b.provider.kind().is_remote())
    }

    pub fn metrics(&self) -> &Arc<RoutingMetrics> {
        &self.metrics
    }

    pub fn breaker(&self, kind: BackendKind) -> Option<&CircuitBreaker> {
        self.find(kind).map(|b| &b.breaker)
    }

    /// First enabled backend in `priority` whose breaker admits a call.
    ///
    /// An expired OPEN breaker moves to HALF_OPEN here, so the caller must
    /// follow up with a recorded call.
    pub fn get_available_backend(&self, priority: &[BackendKind]) -> Option<BackendKind> {
        priority.iter().copied().find(|kind| {
            self.find(*kind)
                .is_some_and(|b| b.enabled && b.breaker.allow())
        })
    }

    /// Runs `op` against `kind` with breaker gating, timing, outcome
    /// recording and retries of retryable failures.
    pub fn invoke<T>(
        &self,
        kind: BackendKind,
        operation: &str,
        op: impl Fn(&dyn DistanceProvider) -> Result<T, ProviderError>,
    ) -> Result<T, ProviderError> {
        let backend = self
            .find(kind)
            .filter(|b| b.enabled)
            .ok_or_else(|| ProviderError::CircuitOpen(kind.as_str().to_string()))?;
        let policy = backend.provider.retry_policy();
        let name = kind.as_str();

        let mut attempt = 0u32;
        loop {
            if !backend.breaker.allow() {
                debug!(backend = name, operation, "circuit open, skipping backend");
                return Err(ProviderError::CircuitOpen(name.to_string()));
            }

            let started = Instant::now();
            let result = op(backend.provider.as_ref());
            let latency = started.elapsed();

            match result {
                Ok(value) => {
                    backend.breaker.record_success(latency);
                    self.metrics.record_success(name, operation, latency);
                    debug!(
                        backend = name,
                        operation,
                        latency_ms = latency.as_millis() as u64,
                        attempt,
                        "backend call succeeded"
                    );
                    return Ok(value);
                }
                Err(err) => {
                    backend.breaker.record_failure(err.kind());
                    self.metrics.record_failure(name, operation, latency, &err);

                    if !err.is_retryable() || attempt >= policy.max_retries {
                        warn!(
                            backend = name,
                            operation,
                            attempt,
                            error = %err,
                            "backend call failed"
                        );
                        return Err(err);
                    }

                    attempt += 1;
                    let delay = policy.delay_for(attempt);
                    info!(
                        backend = name,
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying backend call"
                    );
                    if delay > Duration::ZERO {
                        std::thread::sleep(delay);
                    }
                }
            }
        }
    }

    /// Tries the backends in `priority` in order and returns the first
    /// success together with the backend that produced it.
    pub fn first_success<T>(
        &self,
        priority: &[BackendKind],
        operation: &str,
        op: impl Fn(&dyn DistanceProvider) -> Result<T, ProviderError>,
    ) -> Result<(T, BackendKind), ProviderError> {
        let mut last_error = None;
        for &kind in priority {
            match self.invoke(kind, operation, &op) {
                Ok(value) => return Ok((value, kind)),
                Err(err) => last_error = Some(err),
            }
        }
        Err(last_error.unwrap_or_else(|| ProviderError::CircuitOpen("no backend registered".to_string())))
    }

    pub fn status(&self, kind: BackendKind) -> Option<BackendStatus> {
        self.find(kind).map(status_of)
    }

    pub fn statuses(&self) -> Vec<BackendStatus> {
        self.backends.iter().map(status_of).collect()
    }

    /// Probes a backend without touching its breaker accounting.
    pub fn check_backend_health(&self, kind: BackendKind) -> Option<BackendHealth> {
        let backend = self.find(kind)?;
        let ProbeOutcome {
            reachable,
            sample_ok,
            latency_ms,
            error,
        } = backend.provider.probe();
        debug!(backend = %kind, reachable, sample_ok, latency_ms, "health probe");
        Some(BackendHealth {
            kind,
            reachable,
            sample_ok,
            latency_ms,
            circuit_state: backend.breaker.state(),
            error,
        })
    }

    fn find(&self, kind: BackendKind) -> Option<&Backend> {
        self.backends.iter().find(|b| b.provider.kind() == kind)
    }

    fn find_mut(&mut self, kind: BackendKind) -> Option<&mut Backend> {
        self.backends.iter_mut().find(|b| b.provider.kind() == kind)
    }
}

fn status_of(backend: &Backend) -> BackendStatus {
    let breaker = backend.breaker.snapshot();
    let open_expired = breaker.last_failure_secs_ago.is_none_or(|age| {
        age >= backend.breaker.config().open_timeout.as_secs_f64()
    });
    BackendStatus {
        kind: backend.provider.kind(),
        url: backend.provider.endpoint().map(str::to_string),
        enabled: backend.enabled,
        available: backend.enabled && (breaker.state != CircuitState::Open || open_expired),
        breaker,
    }
}
