//! Drive and service time for an ordered stop list starting at the depot.
//!
//! The drive without return and the return leg are estimated separately
//! because the time box applies different budgets to each. Both go to the
//! remote backends first and fall back to the haversine estimate.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::backend::{BackendKind, BackendManager};
use crate::haversine::{DEFAULT_SAFETY_FACTOR, HaversineProvider, SpeedProfile};
use crate::model::{Point, Stop, TourMetrics, Warning, push_warning};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorConfig {
    pub service_minutes_per_stop: f64,
    /// Shared by every local estimate.
    pub safety_factor: f64,
    pub fallback_speed: SpeedProfile,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            service_minutes_per_stop: 2.0,
            safety_factor: DEFAULT_SAFETY_FACTOR,
            fallback_speed: SpeedProfile::Suburban,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TourEstimate {
    pub driving_min: f64,
    pub return_min: f64,
    pub service_min: f64,
    pub backend_used: BackendKind,
    pub warnings: Vec<Warning>,
}

impl TourEstimate {
    pub fn metrics(&self) -> TourMetrics {
        TourMetrics::new(self.driving_min, self.service_min, self.return_min)
    }

    pub fn total_without_return(&self) -> f64 {
        self.driving_min + self.service_min
    }

    pub fn total_with_return(&self) -> f64 {
        self.total_without_return() + self.return_min
    }
}

#[derive(Debug, Clone)]
pub struct TourTimeEstimator {
    backends: Arc<BackendManager>,
    config: EstimatorConfig,
    local: HaversineProvider,
}

impl TourTimeEstimator {
    pub fn new(backends: Arc<BackendManager>, config: EstimatorConfig) -> Self {
        Self {
            backends,
            config,
            local: HaversineProvider::new(config.fallback_speed, config.safety_factor),
        }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// The fallback estimate, also used for incremental costs while splitting.
    pub fn local(&self) -> &HaversineProvider {
        &self.local
    }

    pub fn service_minutes(&self, stop: &Stop) -> f64 {
        stop.service_minutes
            .unwrap_or(self.config.service_minutes_per_stop)
    }

    /// Estimates `stops` in the given order. Stops without coordinates
    /// contribute service time only.
    pub fn estimate(&self, stops: &[Stop], depot: Point) -> TourEstimate {
        let mut warnings = Vec::new();
        let service_min: f64 = stops.iter().map(|s| self.service_minutes(s)).sum();
        let located: Vec<Point> = stops.iter().filter_map(|s| s.location).collect();

        let (driving_min, return_min, backend_used) = match located.as_slice() {
            [] => (0.0, 0.0, BackendKind::LocalHaversine),
            [only] => {
                // Round trip: the return leg mirrors the outbound one.
                let (leg, kind) = self.drive_minutes(&[depot, *only], &mut warnings);
                (leg, leg, kind)
            }
            [.., last] => {
                let mut path = Vec::with_capacity(located.len() + 1);
                path.push(depot);
                path.extend_from_slice(&located);
                let (driving, kind) = self.drive_minutes(&path, &mut warnings);
                let (back, _) = self.drive_minutes(&[*last, depot], &mut warnings);
                (driving, back, kind)
            }
        };

        debug!(
            stops = stops.len(),
            driving_min,
            return_min,
            service_min,
            backend = %backend_used,
            "tour estimated"
        );

        TourEstimate {
            driving_min,
            return_min,
            service_min,
            backend_used,
            warnings,
        }
    }

    fn drive_minutes(&self, points: &[Point], warnings: &mut Vec<Warning>) -> (f64, BackendKind) {
        if points.len() < 2 {
            return (0.0, BackendKind::LocalHaversine);
        }

        let remote = self.backends.remote_priority();
        if !remote.is_empty() {
            match self
                .backends
                .first_success(&remote, "route", |provider| provider.compute_route(points))
            {
                Ok((route, kind)) => return (route.duration_s / 60.0, kind),
                Err(err) => {
                    debug!(error = %err, "route estimate degraded to local");
                    push_warning(warnings, Warning::DegradedToLocalRoute);
                }
            }
        }

        (self.local.path_minutes(points), BackendKind::LocalHaversine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::BreakerConfig;
    use crate::haversine::haversine_km;
    use crate::metrics::RoutingMetrics;

    const DEPOT: Point = (51.0111988, 13.7016485);

    fn estimator() -> TourTimeEstimator {
        let mut manager = BackendManager::new(Arc::new(RoutingMetrics::default()));
        manager.register(HaversineProvider::default(), BreakerConfig::always_closed());
        TourTimeEstimator::new(Arc::new(manager), EstimatorConfig::default())
    }

    #[test]
    fn test_empty_tour_is_zero() {
        let estimate = estimator().estimate(&[], DEPOT);
        assert_eq!(estimate.total_with_return(), 0.0);
    }

    #[test]
    fn test_single_stop_is_round_trip() {
        let stop = Stop::new("s1", 51.05, 13.73);
        let estimate = estimator().estimate(&[stop], DEPOT);
        let leg = haversine_km(DEPOT, (51.05, 13.73)) * 1.3 / 50.0 * 60.0;
        assert!((estimate.driving_min - leg).abs() < 1e-9);
        assert!((estimate.return_min - leg).abs() < 1e-9);
        assert_eq!(estimate.service_min, 2.0);
        assert_eq!(estimate.backend_used, BackendKind::LocalHaversine);
    }

    #[test]
    fn test_path_excludes_return_leg() {
        let stops = vec![Stop::new("a", 51.05, 13.73), Stop::new("b", 51.06, 13.74)];
        let e = estimator();
        let estimate = e.estimate(&stops, DEPOT);
        let expected = e.local().path_minutes(&[DEPOT, (51.05, 13.73), (51.06, 13.74)]);
        assert!((estimate.driving_min - expected).abs() < 1e-9);
        let back = e.local().leg_minutes((51.06, 13.74), DEPOT);
        assert!((estimate.return_min - back).abs() < 1e-9);
        assert!(estimate.warnings.is_empty());
    }

    #[test]
    fn test_service_time_overrides() {
        let stops = vec![
            Stop::new("a", 51.05, 13.73).with_service_minutes(10.0),
            Stop::new("b", 51.06, 13.74),
            Stop::unlocated("c"),
        ];
        let estimate = estimator().estimate(&stops, DEPOT);
        assert_eq!(estimate.service_min, 14.0);
        let metrics = estimate.metrics();
        assert!((metrics.total_with_return - estimate.total_with_return()).abs() < 1e-9);
    }
}
