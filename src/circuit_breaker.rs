//! Per-backend circuit breaker.
//!
//! CLOSED lets calls through and counts failures. Reaching the trip threshold
//! within the trip window opens the circuit. OPEN rejects calls until
//! `open_timeout` has passed since the last failure, then admits a probe in
//! HALF_OPEN. A successful probe closes the circuit, a failed one re-opens it.
//!
//! Every `allow() == true` must be followed by exactly one `record_success`
//! or `record_failure`. The lock is never held across the guarded call.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::ErrorKind;
use crate::metrics::RoutingMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }

    pub(crate) fn gauge_value(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    /// Failures older than this are forgiven. `None` counts consecutive
    /// failures only, any success resets the count.
    pub trip_window: Option<Duration>,
    pub open_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self::managed()
    }
}

impl BreakerConfig {
    /// Managed backends: 3 failures within 60s, open for 120s.
    pub fn managed() -> Self {
        Self {
            failure_threshold: 3,
            trip_window: Some(Duration::from_secs(60)),
            open_timeout: Duration::from_secs(120),
        }
    }

    /// Single-client breaker: 5 consecutive failures, reset after 60s.
    pub fn simple() -> Self {
        Self {
            failure_threshold: 5,
            trip_window: None,
            open_timeout: Duration::from_secs(60),
        }
    }

    /// For the local estimate, which never trips.
    pub fn always_closed() -> Self {
        Self {
            failure_threshold: u32::MAX,
            trip_window: None,
            open_timeout: Duration::ZERO,
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendState {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_secs_ago: Option<f64>,
    pub last_success_secs_ago: Option<f64>,
    pub last_latency_ms: Option<u64>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    last_success: Option<Instant>,
    last_latency: Option<Duration>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    metrics: Option<Arc<RoutingMetrics>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                last_success: None,
                last_latency: None,
            }),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<RoutingMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    pub fn record_success(&self, latency: Duration) {
        self.record_success_at(Instant::now(), latency)
    }

    pub fn record_failure(&self, kind: ErrorKind) {
        self.record_failure_at(Instant::now(), kind)
    }

    /// Whether a call may proceed at `now`. An expired OPEN circuit moves to
    /// HALF_OPEN and admits the caller as a probe.
    pub fn allow_at(&self, now: Instant) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let expired = inner
                    .last_failure
                    .is_none_or(|t| now.saturating_duration_since(t) >= self.config.open_timeout);
                if expired {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                }
                expired
            }
        }
    }

    pub fn record_success_at(&self, now: Instant, latency: Duration) {
        let mut inner = self.inner.lock();
        inner.last_success = Some(now);
        inner.last_latency = Some(latency);
        match inner.state {
            CircuitState::HalfOpen => {
                inner.failure_count = 0;
                self.transition(&mut inner, CircuitState::Closed);
            }
            CircuitState::Closed => {
                let forgiven = match self.config.trip_window {
                    Some(window) => inner
                        .last_failure
                        .is_none_or(|t| now.saturating_duration_since(t) > window),
                    None => true,
                };
                if forgiven {
                    inner.failure_count = 0;
                }
            }
            // A call admitted before the trip finished late; the circuit
            // stays open until its timeout.
            CircuitState::Open => {}
        }
    }

    pub fn record_failure_at(&self, now: Instant, kind: ErrorKind) {
        let mut inner = self.inner.lock();
        let previous_failure = inner.last_failure.replace(now);
        match inner.state {
            CircuitState::Closed => {
                let outside_window = match (self.config.trip_window, previous_failure) {
                    (Some(window), Some(t)) => now.saturating_duration_since(t) > window,
                    _ => false,
                };
                inner.failure_count = if outside_window {
                    1
                } else {
                    inner.failure_count.saturating_add(1)
                };
                if inner.failure_count >= self.config.failure_threshold {
                    warn!(
                        backend = %self.name,
                        failures = inner.failure_count,
                        kind = kind.as_str(),
                        "circuit breaker tripped"
                    );
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                warn!(backend = %self.name, kind = kind.as_str(), "probe failed, circuit re-opened");
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {
                inner.failure_count = inner.failure_count.saturating_add(1);
            }
        }
    }

    pub fn snapshot(&self) -> BackendState {
        let now = Instant::now();
        let inner = self.inner.lock();
        BackendState {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_secs_ago: inner
                .last_failure
                .map(|t| now.saturating_duration_since(t).as_secs_f64()),
            last_success_secs_ago: inner
                .last_success
                .map(|t| now.saturating_duration_since(t).as_secs_f64()),
            last_latency_ms: inner.last_latency.map(|d| d.as_millis() as u64),
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        if to == CircuitState::Closed {
            info!(backend = %self.name, from = %from, "circuit breaker closed");
        } else {
            info!(backend = %self.name, from = %from, to = %to, "circuit breaker state change");
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_transition(&self.name, from, to);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("osrm", BreakerConfig::managed())
    }

    #[test]
    fn test_starts_closed_and_allows() {
        let b = breaker();
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.allow());
    }

    #[test]
    fn test_below_threshold_never_trips() {
        let b = breaker();
        let t0 = Instant::now();
        b.record_failure_at(t0, ErrorKind::Transient);
        b.record_failure_at(t0 + Duration::from_secs(1), ErrorKind::Transient);
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.failure_count(), 2);
    }

    #[test]
    fn test_failures_outside_window_restart_count() {
        let b = breaker();
        let t0 = Instant::now();
        b.record_failure_at(t0, ErrorKind::Timeout);
        b.record_failure_at(t0 + Duration::from_secs(10), ErrorKind::Timeout);
        b.record_failure_at(t0 + Duration::from_secs(100), ErrorKind::Timeout);
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.failure_count(), 1);
    }

    #[test]
    fn test_open_rejects_until_timeout() {
        let b = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            b.record_failure_at(t0, ErrorKind::Transient);
        }
        assert_eq!(b.state(), CircuitState::Open);
        assert!(!b.allow_at(t0 + Duration::from_secs(119)));
        assert_eq!(b.state(), CircuitState::Open);
        assert!(b.allow_at(t0 + Duration::from_secs(120)));
        assert_eq!(b.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_failure_rearms() {
        let b = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            b.record_failure_at(t0, ErrorKind::Transient);
        }
        let probe = t0 + Duration::from_secs(121);
        assert!(b.allow_at(probe));
        b.record_failure_at(probe, ErrorKind::Timeout);
        assert_eq!(b.state(), CircuitState::Open);
        assert!(!b.allow_at(probe + Duration::from_secs(60)));
        assert!(b.allow_at(probe + Duration::from_secs(120)));
    }

    #[test]
    fn test_closed_success_forgives_only_after_window() {
        let b = breaker();
        let t0 = Instant::now();
        b.record_failure_at(t0, ErrorKind::Transient);
        b.record_failure_at(t0, ErrorKind::Transient);
        b.record_success_at(t0 + Duration::from_secs(30), Duration::from_millis(50));
        assert_eq!(b.failure_count(), 2);
        b.record_success_at(t0 + Duration::from_secs(61), Duration::from_millis(50));
        assert_eq!(b.failure_count(), 0);
    }

    #[test]
    fn test_simple_variant_counts_consecutive_failures() {
        let b = CircuitBreaker::new("osrm", BreakerConfig::simple());
        let t0 = Instant::now();
        for _ in 0..4 {
            b.record_failure_at(t0, ErrorKind::Transient);
        }
        b.record_success_at(t0, Duration::from_millis(5));
        assert_eq!(b.failure_count(), 0);
        for _ in 0..5 {
            b.record_failure_at(t0, ErrorKind::Transient);
        }
        assert_eq!(b.state(), CircuitState::Open);
        assert!(b.allow_at(t0 + Duration::from_secs(60)));
    }

    #[test]
    fn test_always_closed_never_trips() {
        let b = CircuitBreaker::new("local_haversine", BreakerConfig::always_closed());
        for _ in 0..1000 {
            b.record_failure(ErrorKind::Other);
        }
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.allow());
    }

    #[test]
    fn test_transitions_are_recorded() {
        let metrics = Arc::new(RoutingMetrics::default());
        let b = breaker().with_metrics(metrics.clone());
        let t0 = Instant::now();
        for _ in 0..3 {
            b.record_failure_at(t0, ErrorKind::Transient);
        }
        assert!(b.allow_at(t0 + Duration::from_secs(120)));
        b.record_success_at(t0 + Duration::from_secs(120), Duration::from_millis(20));

        let snap = metrics.snapshot();
        assert_eq!(snap.breaker_trips, 1);
        assert_eq!(snap.transitions.get("osrm:CLOSED->OPEN"), Some(&1));
        assert_eq!(snap.transitions.get("osrm:OPEN->HALF_OPEN"), Some(&1));
        assert_eq!(snap.transitions.get("osrm:HALF_OPEN->CLOSED"), Some(&1));
    }

    #[test]
    fn test_snapshot_serializes_state_names() {
        let b = breaker();
        b.record_success(Duration::from_millis(42));
        let snap = b.snapshot();
        assert_eq!(snap.last_latency_ms, Some(42));
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["state"], "CLOSED");
    }
}
