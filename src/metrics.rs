//! Routing metrics collection.
//!
//! Samples are kept in bounded ring buffers for the status snapshot, and every
//! event is also emitted through the `metrics` facade so the host process can
//! install whatever exporter it uses.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::circuit_breaker::CircuitState;
use crate::error::{ErrorKind, ProviderError};

pub const DEFAULT_SAMPLE_CAPACITY: usize = 1000;

const RECENT_ERRORS_IN_SNAPSHOT: usize = 10;

#[derive(Debug, Clone)]
struct LatencySample {
    latency_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorSample {
    pub backend: String,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    successful: u64,
    failed: u64,
    timeouts: u64,
    quota: u64,
    transient: u64,
    breaker_trips: u64,
    transitions: BTreeMap<String, u64>,
}

#[derive(Debug)]
struct Samples {
    latencies: VecDeque<LatencySample>,
    errors: VecDeque<ErrorSample>,
    counters: Counters,
}

/// Aggregated view of the collected samples.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub timeout_errors: u64,
    pub quota_errors: u64,
    pub transient_errors: u64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub breaker_trips: u64,
    /// Keyed `"<backend>:<FROM>-><TO>"`.
    pub transitions: BTreeMap<String, u64>,
    pub recent_errors: Vec<ErrorSample>,
}

/// Thread-safe collector shared by the backend manager and breakers.
#[derive(Debug)]
pub struct RoutingMetrics {
    capacity: usize,
    samples: Mutex<Samples>,
}

impl Default for RoutingMetrics {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_CAPACITY)
    }
}

impl RoutingMetrics {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: Mutex::new(Samples {
                latencies: VecDeque::with_capacity(capacity),
                errors: VecDeque::with_capacity(capacity),
                counters: Counters::default(),
            }),
        }
    }

    pub fn record_success(&self, backend: &str, operation: &str, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;
        {
            let mut samples = self.samples.lock();
            push_bounded(&mut samples.latencies, LatencySample { latency_ms }, self.capacity);
            samples.counters.total += 1;
            samples.counters.successful += 1;
        }

        counter!("routing_requests_total", "backend" => backend.to_string(), "operation" => operation.to_string(), "status" => "success").increment(1);
        histogram!("routing_request_duration_seconds", "backend" => backend.to_string(), "operation" => operation.to_string()).record(latency.as_secs_f64());
    }

    pub fn record_failure(&self, backend: &str, operation: &str, latency: Duration, err: &ProviderError) {
        let kind = err.kind();
        let latency_ms = latency.as_secs_f64() * 1000.0;
        {
            let mut samples = self.samples.lock();
            push_bounded(&mut samples.latencies, LatencySample { latency_ms }, self.capacity);
            push_bounded(
                &mut samples.errors,
                ErrorSample {
                    backend: backend.to_string(),
                    kind,
                    message: err.to_string(),
                },
                self.capacity,
            );
            let counters = &mut samples.counters;
            counters.total += 1;
            counters.failed += 1;
            match kind {
                ErrorKind::Timeout => counters.timeouts += 1,
                ErrorKind::Quota => counters.quota += 1,
                ErrorKind::Transient => counters.transient += 1,
                ErrorKind::Other => {}
            }
        }

        counter!("routing_requests_total", "backend" => backend.to_string(), "operation" => operation.to_string(), "status" => "error").increment(1);
        counter!("routing_errors_total", "backend" => backend.to_string(), "kind" => kind.as_str()).increment(1);
        histogram!("routing_request_duration_seconds", "backend" => backend.to_string(), "operation" => operation.to_string()).record(latency.as_secs_f64());
        debug!(backend, operation, kind = kind.as_str(), "recorded routing error");
    }

    pub fn record_transition(&self, backend: &str, from: CircuitState, to: CircuitState) {
        {
            let mut samples = self.samples.lock();
            let key = format!("{}:{}->{}", backend, from.as_str(), to.as_str());
            *samples.counters.transitions.entry(key).or_insert(0) += 1;
            if to == CircuitState::Open && from != CircuitState::Open {
                samples.counters.breaker_trips += 1;
            }
        }

        counter!("routing_circuit_transitions_total", "backend" => backend.to_string(), "from" => from.as_str(), "to" => to.as_str()).increment(1);
        gauge!("routing_circuit_state", "backend" => backend.to_string()).set(to.gauge_value());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let samples = self.samples.lock();
        let mut latencies: Vec<f64> = samples.latencies.iter().map(|s| s.latency_ms).collect();
        latencies.sort_by(|a, b| a.total_cmp(b));

        let avg = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };
        let c = &samples.counters;
        let success_rate = if c.total == 0 {
            1.0
        } else {
            c.successful as f64 / c.total as f64
        };

        MetricsSnapshot {
            total_requests: c.total,
            successful_requests: c.successful,
            failed_requests: c.failed,
            success_rate,
            timeout_errors: c.timeouts,
            quota_errors: c.quota,
            transient_errors: c.transient,
            avg_latency_ms: avg,
            p95_latency_ms: percentile(&latencies, 0.95),
            p99_latency_ms: percentile(&latencies, 0.99),
            breaker_trips: c.breaker_trips,
            transitions: c.transitions.clone(),
            recent_errors: samples
                .errors
                .iter()
                .rev()
                .take(RECENT_ERRORS_IN_SNAPSHOT)
                .cloned()
                .collect(),
        }
    }

    /// Number of latency samples currently buffered.
    pub fn sample_count(&self) -> usize {
        self.samples.lock().latencies.len()
    }
}

fn push_bounded<T>(buf: &mut VecDeque<T>, item: T, capacity: usize) {
    if buf.len() == capacity {
        buf.pop_front();
    }
    buf.push_back(item);
}

/// Nearest-rank percentile over sorted values.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
