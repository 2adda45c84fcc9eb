//! OSRM HTTP adapter for distance matrices and routes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::blocking::{Client, Response};
use reqwest::header::RETRY_AFTER;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::backend::BackendKind;
use crate::error::ProviderError;
use crate::matrix::DistanceMatrix;
use crate::model::Point;
use crate::polyline::Polyline;
use crate::rate_limiter::TokenBucket;
use crate::traits::{DistanceProvider, ProbeOutcome, RetryPolicy, RouteSummary};

/// Public demo instance used as the secondary backend.
pub const PUBLIC_OSRM_URL: &str = "https://router.project-osrm.org";

/// Share of the read timeout granted to connection setup.
const CONNECT_TIMEOUT_SHARE: f64 = 0.3;

/// Largest accepted request timeout, in seconds.
pub const MAX_TIMEOUT_SECS: f64 = 300.0;

const MIN_TIMEOUT_SECS: f64 = 0.001;

const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Sample points near Dresden used by the health probe.
const PROBE_FROM: Point = (51.0493, 13.7381);
const PROBE_TO: Point = (51.0639, 13.7522);

#[derive(Debug, Clone, PartialEq)]
pub struct OsrmConfig {
    pub base_url: String,
    pub profile: String,
    pub timeout_secs: f64,
    pub retries: u32,
    pub retry_backoff: Duration,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            profile: "car".to_string(),
            timeout_secs: 6.0,
            retries: 2,
            retry_backoff: Duration::from_millis(300),
        }
    }
}

impl OsrmConfig {
    /// Settings for the public instance: tried once, no retries.
    pub fn public_fallback(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            retries: 0,
            ..Self::default()
        }
    }

    /// `timeout_secs` clamped to [1ms, `MAX_TIMEOUT_SECS`]; NaN reads as the
    /// minimum.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs_f64(clamp_secs(self.timeout_secs))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(clamp_secs(clamp_secs(self.timeout_secs) * CONNECT_TIMEOUT_SHARE))
    }
}

#[derive(Debug, Clone)]
pub struct OsrmClient {
    config: OsrmConfig,
    kind: BackendKind,
    client: Client,
    probe_client: Client,
    limiter: Option<Arc<TokenBucket>>,
}

impl OsrmClient {
    pub fn new(config: OsrmConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.read_timeout())
            .build()?;
        let probe_client = Client::builder()
            .connect_timeout(PROBE_CONNECT_TIMEOUT)
            .timeout(PROBE_TIMEOUT)
            .build()?;

        Ok(Self {
            config,
            kind: BackendKind::Osrm,
            client,
            probe_client,
            limiter: None,
        })
    }

    /// Registers this client under a different backend kind.
    pub fn with_kind(mut self, kind: BackendKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<TokenBucket>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn config(&self) -> &OsrmConfig {
        &self.config
    }

    fn service_url(&self, service: &str, coords: &[Point], query: &str) -> String {
        format!(
            "{}/{}/v1/{}/{}?{}",
            self.config.base_url.trim_end_matches('/'),
            service,
            self.config.profile,
            coords_param(coords),
            query
        )
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ProviderError> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire();
        }
        debug!(backend = %self.kind, url, "OSRM request");
        let response = self.client.get(url).send()?;
        let response = check_status(response)?;
        response
            .json::<T>()
            .map_err(|err| ProviderError::Parse(err.to_string()))
    }

    fn probe_url(&self, url: &str) -> Result<bool, ProviderError> {
        let response = self.probe_client.get(url).send()?;
        if !response.status().is_success() {
            return Ok(false);
        }
        let body: OsrmStatus = response
            .json()
            .map_err(|err| ProviderError::Parse(err.to_string()))?;
        Ok(body.code == "Ok")
    }
}

impl DistanceProvider for OsrmClient {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn compute_matrix(&self, coords: &[Point]) -> Result<DistanceMatrix, ProviderError> {
        if coords.is_empty() {
            return Err(ProviderError::EmptyInput {
                required: 1,
                got: 0,
            });
        }

        let url = self.service_url("table", coords, "annotations=distance,duration");
        let body: OsrmTableResponse = self.get_json(&url)?;
        ensure_ok(&body.code, body.message.as_deref())?;

        let n = coords.len();
        let durations = fill_cells(
            body.durations
                .ok_or_else(|| ProviderError::Parse("table response without durations".to_string()))?,
            "duration",
        )?;
        let distances = match body.distances {
            Some(rows) => fill_cells(rows, "distance")?,
            None => vec![vec![0.0; n]; n],
        };
        if durations.len() != n {
            return Err(ProviderError::Parse(format!(
                "expected {} rows, got {}",
                n,
                durations.len()
            )));
        }
        DistanceMatrix::from_rows(durations, distances)
    }

    fn compute_route(&self, coords: &[Point]) -> Result<RouteSummary, ProviderError> {
        if coords.len() < 2 {
            return Err(ProviderError::EmptyInput {
                required: 2,
                got: coords.len(),
            });
        }

        let url = self.service_url("route", coords, "overview=full&geometries=polyline");
        let body: OsrmRouteResponse = self.get_json(&url)?;
        ensure_ok(&body.code, body.message.as_deref())?;

        let route = body
            .routes
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Parse("route response without routes".to_string()))?;
        let geometry = match route.geometry {
            Some(encoded) => Polyline::decode(&encoded, 5)?,
            None => Polyline::default(),
        };

        Ok(RouteSummary {
            geometry,
            distance_m: route.distance,
            duration_s: route.duration,
        })
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.config.retries,
            backoff_step: self.config.retry_backoff,
        }
    }

    /// Queries `/nearest` at a sample point, falling back to a two-point
    /// `/route` when `/nearest` is rejected.
    fn probe(&self) -> ProbeOutcome {
        let started = Instant::now();
        let nearest = self.service_url("nearest", &[PROBE_FROM], "number=1");
        let result = match self.probe_url(&nearest) {
            Ok(true) => Ok(true),
            Ok(false) => self.probe_url(&self.service_url("route", &[PROBE_FROM, PROBE_TO], "overview=false")),
            Err(err) => Err(err),
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(sample_ok) => ProbeOutcome {
                reachable: true,
                sample_ok,
                latency_ms,
                error: (!sample_ok).then(|| "sample request rejected".to_string()),
            },
            Err(err) => ProbeOutcome {
                reachable: false,
                sample_ok: false,
                latency_ms,
                error: Some(err.to_string()),
            },
        }
    }

    fn endpoint(&self) -> Option<&str> {
        Some(&self.config.base_url)
    }
}

fn clamp_secs(secs: f64) -> f64 {
    if secs.is_nan() {
        MIN_TIMEOUT_SECS
    } else {
        secs.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS)
    }
}

/// OSRM expects `lon,lat` pairs separated by `;`.
fn coords_param(coords: &[Point]) -> String {
    coords
        .iter()
        .map(|(lat, lng)| format!("{:.6},{:.6}", lng, lat))
        .collect::<Vec<_>>()
        .join(";")
}

fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    Err(ProviderError::from_status(status.as_u16(), retry_after))
}

fn ensure_ok(code: &str, message: Option<&str>) -> Result<(), ProviderError> {
    if code == "Ok" {
        Ok(())
    } else {
        Err(ProviderError::Service {
            code: code.to_string(),
            message: message.unwrap_or_default().to_string(),
        })
    }
}

/// Unroutable pairs come back as `null`; a matrix with holes is rejected.
fn fill_cells(rows: Vec<Vec<Option<f64>>>, what: &str) -> Result<Vec<Vec<f64>>, ProviderError> {
    rows.into_iter()
        .enumerate()
        .map(|(i, row)| {
            row.into_iter()
                .enumerate()
                .map(|(j, cell)| {
                    cell.ok_or_else(|| ProviderError::Service {
                        code: "NoTableEntry".to_string(),
                        message: format!("no {what} between {i} and {j}"),
                    })
                })
                .collect()
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct OsrmStatus {
    code: String,
}

#[derive(Debug, Deserialize)]
struct OsrmTableResponse {
    code: String,
    message: Option<String>,
    durations: Option<Vec<Vec<Option<f64>>>>,
    distances: Option<Vec<Vec<Option<f64>>>>,
}

#[derive(Debug, Deserialize)]
struct OsrmRouteResponse {
    code: String,
    message: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    distance: f64,
    duration: f64,
    geometry: Option<String>,
}
