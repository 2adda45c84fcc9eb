//! Planner configuration
//!
//! Defaults carry the tuned business values (65/90 minute budgets, 2 minute
//! service time, 1.3 safety factor, 3% quality floor). Every value can be
//! overridden from the environment.

use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::circuit_breaker::BreakerConfig;
use crate::cluster::ClusterParams;
use crate::error::ConfigError;
use crate::estimator::EstimatorConfig;
use crate::metrics::DEFAULT_SAMPLE_CAPACITY;
use crate::model::Point;
use crate::osrm::{MAX_TIMEOUT_SECS, OsrmConfig, PUBLIC_OSRM_URL};
use crate::rate_limiter::{MIN_RATE_PER_SEC, RateLimitConfig};
use crate::sector::SectorPlanParams;
use crate::solver::SolverConfig;
use crate::splitter::TimeboxConfig;

/// FAMO depot, Dresden.
pub const DEFAULT_DEPOT: Point = (51.0111988, 13.7016485);

#[derive(Debug, Clone, PartialEq)]
pub struct PlannerConfig {
    pub depot: Point,
    /// Self-hosted routing service; `None` plans with the local estimate only.
    pub osrm: Option<OsrmConfig>,
    /// Public routing instance tried after `osrm`.
    pub osrm_fallback: Option<OsrmConfig>,
    pub breaker: BreakerConfig,
    pub rate_limit: Option<RateLimitConfig>,
    pub estimator: EstimatorConfig,
    pub solver: SolverConfig,
    pub timebox: TimeboxConfig,
    pub cluster: ClusterParams,
    pub sector: SectorPlanParams,
    pub metrics_capacity: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            depot: DEFAULT_DEPOT,
            osrm: None,
            osrm_fallback: None,
            breaker: BreakerConfig::managed(),
            rate_limit: None,
            estimator: EstimatorConfig::default(),
            solver: SolverConfig::default(),
            timebox: TimeboxConfig::default(),
            cluster: ClusterParams::default(),
            sector: SectorPlanParams::default(),
            metrics_capacity: DEFAULT_SAMPLE_CAPACITY,
        }
    }
}

impl PlannerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from any key lookup, starting from defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Lookup(lookup);
        let mut config = Self::default();

        if let (Some(lat), Some(lon)) = (env.parse::<f64>("DEPOT_LAT")?, env.parse::<f64>("DEPOT_LON")?) {
            config.depot = (lat, lon);
        }

        if let Some(base_url) = env.string("OSRM_BASE_URL") {
            let mut osrm = OsrmConfig {
                base_url,
                ..OsrmConfig::default()
            };
            if let Some(profile) = env.string("OSRM_PROFILE") {
                osrm.profile = profile;
            }
            if let Some(timeout) = env.parse::<f64>("OSRM_TIMEOUT_S")? {
                if !timeout.is_finite() || timeout <= 0.0 || timeout > MAX_TIMEOUT_SECS {
                    return Err(invalid("OSRM_TIMEOUT_S", timeout));
                }
                osrm.timeout_secs = timeout;
            }
            if let Some(retries) = env.parse::<u32>("OSRM_RETRIES")? {
                osrm.retries = retries;
            }
            if let Some(ms) = env.parse::<u64>("OSRM_RETRY_BACKOFF_MS")? {
                osrm.retry_backoff = Duration::from_millis(ms);
            }
            config.osrm = Some(osrm);
        }

        if env.flag("FEATURE_OSRM_FALLBACK")?.unwrap_or(false) {
            let url = env
                .string("OSRM_FALLBACK_URL")
                .unwrap_or_else(|| PUBLIC_OSRM_URL.to_string());
            let mut fallback = OsrmConfig::public_fallback(url);
            if let Some(primary) = &config.osrm {
                fallback.profile = primary.profile.clone();
                fallback.timeout_secs = primary.timeout_secs;
            }
            config.osrm_fallback = Some(fallback);
        }

        if let Some(max_fails) = env.parse::<u32>("OSRM_BREAKER_MAX_FAILS")? {
            if max_fails == 0 {
                return Err(invalid("OSRM_BREAKER_MAX_FAILS", max_fails));
            }
            config.breaker.failure_threshold = max_fails;
        }
        if let Some(window) = env.parse::<u64>("OSRM_BREAKER_WINDOW_SEC")? {
            config.breaker.trip_window = (window > 0).then(|| Duration::from_secs(window));
        }
        if let Some(reset) = env.parse::<u64>("OSRM_BREAKER_RESET_SEC")? {
            config.breaker.open_timeout = Duration::from_secs(reset);
        }

        if let Some(rate) = env.parse::<f64>("OSRM_RATE_LIMIT_PER_SEC")? {
            if !rate.is_finite() || rate < MIN_RATE_PER_SEC {
                return Err(invalid("OSRM_RATE_LIMIT_PER_SEC", rate));
            }
            let burst = env
                .parse::<u32>("OSRM_RATE_LIMIT_BURST")?
                .unwrap_or_else(|| rate.ceil() as u32)
                .max(1);
            config.rate_limit = Some(RateLimitConfig {
                rate_per_sec: rate,
                burst,
            });
        }

        if let Some(minutes) = env.minutes("TIME_BUDGET_WITHOUT_RETURN")? {
            config.timebox.max_without_return_min = minutes;
            config.sector.budget_without_return_min = minutes;
        }
        if let Some(minutes) = env.minutes("TIME_BUDGET_WITH_RETURN")? {
            config.timebox.max_with_return_min = Some(minutes);
        }
        if let Some(depth) = env.parse::<usize>("TIMEBOX_MAX_DEPTH")? {
            config.timebox.max_depth = depth;
            config.sector.max_depth = depth;
        }
        if let Some(minutes) = env.minutes("SERVICE_TIME_PER_STOP_MIN")? {
            config.estimator.service_minutes_per_stop = minutes;
        }
        if let Some(factor) = env.parse::<f64>("URBAN_SAFETY_FACTOR")? {
            if factor < 1.0 || !factor.is_finite() {
                return Err(invalid("URBAN_SAFETY_FACTOR", factor));
            }
            config.estimator.safety_factor = factor;
        }

        info!(
            osrm = config.osrm.as_ref().map(|o| o.base_url.as_str()).unwrap_or("disabled"),
            fallback = config.osrm_fallback.is_some(),
            budget_min = config.timebox.max_without_return_min,
            "planner configuration loaded"
        );
        Ok(config)
    }
}

struct Lookup<F>(F);

impl<F: Fn(&str) -> Option<String>> Lookup<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &'static str) -> Result<Option<T>, ConfigError> {
        self.string(key)
            .map(|value| {
                value
                    .parse::<T>()
                    .map_err(|_| ConfigError::Invalid { key, value })
            })
            .transpose()
    }

    /// Non-negative finite minutes.
    fn minutes(&self, key: &'static str) -> Result<Option<f64>, ConfigError> {
        match self.parse::<f64>(key)? {
            Some(m) if m < 0.0 || !m.is_finite() => Err(invalid(key, m)),
            other => Ok(other),
        }
    }

    fn flag(&self, key: &'static str) -> Result<Option<bool>, ConfigError> {
        self.string(key)
            .map(|value| match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid { key, value }),
            })
            .transpose()
    }
}

fn invalid(key: &'static str, value: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
    }
}
