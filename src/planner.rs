//! Planner facade: matrix building, ordering, estimation, time-box
//! enforcement and geographic pre-partitioning over one shared backend set.

use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::backend::{BackendHealth, BackendKind, BackendManager, BackendStatus};
use crate::circuit_breaker::BreakerConfig;
use crate::cluster::ProximityClusterer;
use crate::config::PlannerConfig;
use crate::error::{ConfigError, PlannerError};
use crate::estimator::{TourEstimate, TourTimeEstimator};
use crate::haversine::{HaversineProvider, SpeedProfile};
use crate::matrix::DistanceMatrix;
use crate::matrix_builder::{DistanceMatrixBuilder, MatrixBuild};
use crate::metrics::{MetricsSnapshot, RoutingMetrics};
use crate::model::{
    Cluster, Point, QuarantinedTour, Stop, Tour, TourMetrics, Warning, is_valid_point, push_warning,
    verify_same_stops,
};
use crate::osrm::OsrmClient;
use crate::rate_limiter::TokenBucket;
use crate::sector::partition_by_sector;
use crate::solver::{Quality, RouteSolution, RouteSolver, SolverKind};
use crate::splitter::{TimeboxConfig, TourSplitter};

/// Chosen stop order for one optimization call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationResult {
    /// Positions into the input stop list.
    pub order: Vec<usize>,
    pub stops: Vec<Stop>,
    /// Depot to last stop, without return.
    pub total_duration_min: f64,
    pub gain_pct: f64,
    pub backend_used: BackendKind,
    pub solver: SolverKind,
    pub elapsed_ms: u64,
    pub quality: Quality,
    pub warnings: Vec<Warning>,
}

/// Pre-partitioning applied before time-box enforcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partitioning {
    None,
    /// Fixed bearing sectors (4 or 8).
    Sectors(usize),
    Proximity,
}

#[derive(Debug)]
pub struct TourPlanner {
    config: PlannerConfig,
    backends: Arc<BackendManager>,
    matrix_builder: DistanceMatrixBuilder,
    solver: RouteSolver,
    estimator: TourTimeEstimator,
}

impl TourPlanner {
    /// Registers the configured remote backends, then the local estimate.
    pub fn new(config: PlannerConfig) -> Result<Self, ConfigError> {
        let metrics = Arc::new(RoutingMetrics::new(config.metrics_capacity));
        let limiter = config.rate_limit.map(|limit| Arc::new(TokenBucket::new(limit)));
        let mut manager = BackendManager::new(metrics);

        if let Some(osrm) = &config.osrm {
            let mut client = OsrmClient::new(osrm.clone())?;
            if let Some(limiter) = &limiter {
                client = client.with_rate_limiter(limiter.clone());
            }
            manager.register(client, config.breaker);
        }
        if let Some(public) = &config.osrm_fallback {
            let mut client = OsrmClient::new(public.clone())?.with_kind(BackendKind::OsrmPublic);
            if let Some(limiter) = &limiter {
                client = client.with_rate_limiter(limiter.clone());
            }
            manager.register(client, config.breaker);
        }
        manager.register(
            HaversineProvider::new(SpeedProfile::Urban, config.estimator.safety_factor),
            BreakerConfig::always_closed(),
        );

        info!(backends = ?manager.priority(), "tour planner ready");
        Ok(Self::with_backends(config, manager))
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(PlannerConfig::from_env()?)
    }

    /// Uses an already populated backend manager.
    pub fn with_backends(config: PlannerConfig, backends: BackendManager) -> Self {
        let backends = Arc::new(backends);
        let local = HaversineProvider::new(SpeedProfile::Urban, config.estimator.safety_factor);
        Self {
            matrix_builder: DistanceMatrixBuilder::new(backends.clone(), local),
            solver: RouteSolver::new(config.solver.clone()),
            estimator: TourTimeEstimator::new(backends.clone(), config.estimator),
            backends,
            config,
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn backends(&self) -> &BackendManager {
        &self.backends
    }

    pub fn depot(&self) -> Point {
        self.config.depot
    }

    pub fn build_distance_matrix(&self, coords: &[Point]) -> MatrixBuild {
        self.matrix_builder.build(coords)
    }

    pub fn solve_route(&self, matrix: &DistanceMatrix) -> RouteSolution {
        self.solver.solve(matrix)
    }

    /// Orders `stops` starting from the depot. Stops without coordinates
    /// keep their relative order at the end.
    pub fn optimize_stops(&self, stops: &[Stop]) -> Result<OptimizationResult, PlannerError> {
        if stops.is_empty() {
            return Err(PlannerError::EmptyStops);
        }
        validate_stops(stops, self.config.depot)?;

        let located: Vec<usize> = (0..stops.len()).filter(|&i| stops[i].is_located()).collect();
        let mut coords = Vec::with_capacity(located.len() + 1);
        coords.push(self.config.depot);
        coords.extend(located.iter().filter_map(|&i| stops[i].location));

        let build = self.matrix_builder.build(&coords);
        let solution = self.solver.solve(&build.matrix);

        let mut order: Vec<usize> = solution
            .order
            .iter()
            .filter(|&&idx| idx > 0)
            .map(|&idx| located[idx - 1])
            .collect();
        let mut warnings = build.warnings;
        for warning in &solution.warnings {
            push_warning(&mut warnings, *warning);
        }
        if located.len() < stops.len() {
            order.extend((0..stops.len()).filter(|&i| !stops[i].is_located()));
            push_warning(&mut warnings, Warning::StopsWithoutCoordinatesAppended);
        }

        let ordered: Vec<Stop> = order.iter().map(|&i| stops[i].clone()).collect();
        verify_same_stops("optimization", stops, &ordered)?;

        Ok(OptimizationResult {
            order,
            stops: ordered,
            total_duration_min: solution.duration_s / 60.0,
            gain_pct: solution.gain_pct,
            backend_used: build.backend_used,
            solver: solution.solver,
            elapsed_ms: solution.elapsed_ms,
            quality: solution.quality,
            warnings,
        })
    }

    /// Drive time without return and the return leg, in the given order.
    pub fn estimate_tour_time(&self, stops: &[Stop], depot: Point) -> Result<TourEstimate, PlannerError> {
        validate_stops(stops, depot)?;
        Ok(self.estimator.estimate(stops, depot))
    }

    pub fn enforce_timebox(
        &self,
        tour_name: &str,
        stops: &[Stop],
        budget_without_return_min: f64,
        budget_with_return_min: Option<f64>,
        max_depth: usize,
    ) -> Result<Vec<Tour>, PlannerError> {
        validate_stops(stops, self.config.depot)?;
        let config = TimeboxConfig {
            max_without_return_min: budget_without_return_min,
            max_with_return_min: budget_with_return_min,
            max_depth,
            ..self.config.timebox
        };
        TourSplitter::new(self.estimator.clone(), self.config.depot, config).split(tour_name, stops)
    }

    pub fn partition_by_sector(
        &self,
        stops: &[Stop],
        depot: Point,
        sector_count: usize,
    ) -> Result<Vec<Cluster>, PlannerError> {
        validate_stops(stops, depot)?;
        partition_by_sector(stops, depot, sector_count)
    }

    pub fn cluster_by_proximity(&self, stops: &[Stop]) -> Result<Vec<Cluster>, PlannerError> {
        validate_stops(stops, self.config.depot)?;
        Ok(ProximityClusterer::new(
            self.config.cluster,
            *self.estimator.local(),
            self.config.estimator.service_minutes_per_stop,
        )
        .cluster(stops, self.config.depot))
    }

    /// Full pipeline: partition, order each partition, enforce the time box.
    ///
    /// Returns the single resulting tour, or a parent whose children are the
    /// compliant sub-tours. A partition whose output fails the stop-set check
    /// is quarantined on the parent; the call fails only if every partition
    /// does.
    pub fn plan_tour(
        &self,
        name: &str,
        stops: &[Stop],
        partitioning: Partitioning,
    ) -> Result<Tour, PlannerError> {
        if stops.is_empty() {
            return Err(PlannerError::EmptyStops);
        }
        validate_stops(stops, self.config.depot)?;

        let (groups, timebox) = match partitioning {
            Partitioning::None => (vec![(name.to_string(), stops.to_vec())], self.config.timebox),
            Partitioning::Sectors(count) => {
                let sector = self.config.sector;
                let groups = partition_by_sector(stops, self.config.depot, count)?
                    .into_iter()
                    .map(|c| (format!("{} {}", name, c.label), c.stops))
                    .collect();
                let timebox = TimeboxConfig {
                    max_without_return_min: sector.budget_without_return_min,
                    max_with_return_min: Some(sector.hard_deadline_with_return_min),
                    max_depth: sector.max_depth,
                    ..self.config.timebox
                };
                (groups, timebox)
            }
            Partitioning::Proximity => {
                let groups = self
                    .cluster_by_proximity(stops)?
                    .into_iter()
                    .map(|c| (format!("{} {}", name, c.label), c.stops))
                    .collect();
                (groups, self.config.timebox)
            }
        };

        let outcomes: Vec<GroupOutcome> = groups
            .into_par_iter()
            .map(|(group_name, members)| {
                let planned = self.plan_group(&group_name, &members, timebox);
                (group_name, members, planned)
            })
            .collect();
        assemble_plan(name, stops, outcomes)
    }

    fn plan_group(&self, name: &str, stops: &[Stop], timebox: TimeboxConfig) -> Result<Vec<Tour>, PlannerError> {
        if stops.is_empty() {
            return Ok(Vec::new());
        }
        let optimized = self.optimize_stops(stops)?;
        let mut tours = TourSplitter::new(self.estimator.clone(), self.config.depot, timebox)
            .split(name, &optimized.stops)?;
        for tour in &mut tours {
            for warning in &optimized.warnings {
                push_warning(&mut tour.warnings, *warning);
            }
        }
        Ok(tours)
    }

    pub fn backend_status(&self) -> Vec<BackendStatus> {
        self.backends.statuses()
    }

    pub fn check_backend_health(&self, kind: BackendKind) -> Option<BackendHealth> {
        self.backends.check_backend_health(kind)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.backends.metrics().snapshot()
    }
}

type GroupOutcome = (String, Vec<Stop>, Result<Vec<Tour>, PlannerError>);

/// Joins per-partition results into the returned tour.
fn assemble_plan(name: &str, stops: &[Stop], outcomes: Vec<GroupOutcome>) -> Result<Tour, PlannerError> {
    let mut children: Vec<Tour> = Vec::new();
    let mut quarantined = Vec::new();
    let mut first_error = None;
    for (group_name, members, planned) in outcomes {
        match planned {
            Ok(tours) => children.extend(tours),
            Err(err) => {
                error!(tour = %group_name, error = %err, "partition failed, quarantined");
                quarantined.push(QuarantinedTour {
                    name: group_name,
                    stops: members,
                    reason: err.to_string(),
                });
                first_error.get_or_insert(err);
            }
        }
    }

    if children.is_empty() {
        if let Some(err) = first_error {
            return Err(err);
        }
    }

    if children.len() == 1 && quarantined.is_empty() {
        let mut tour = children.remove(0);
        tour.name = name.to_string();
        verify_same_stops(name, stops, &tour.stops)?;
        return Ok(tour);
    }

    let mut warnings = Vec::new();
    for child in &children {
        for warning in &child.warnings {
            push_warning(&mut warnings, *warning);
        }
    }
    if !quarantined.is_empty() {
        push_warning(&mut warnings, Warning::TourQuarantined);
    }
    let backend_used = match children.first() {
        Some(first) if children.iter().all(|c| c.backend_used == first.backend_used) => first.backend_used,
        _ => BackendKind::LocalHaversine,
    };
    let metrics = children.iter().fold(TourMetrics::default(), |acc, c| {
        TourMetrics::new(
            acc.driving_time_min + c.metrics.driving_time_min,
            acc.service_time_min + c.metrics.service_time_min,
            acc.return_time_min + c.metrics.return_time_min,
        )
    });
    let all_stops: Vec<Stop> = children.iter().flat_map(|c| c.stops.iter().cloned()).collect();
    verify_same_stops(
        name,
        stops,
        all_stops.iter().chain(quarantined.iter().flat_map(|q| q.stops.iter())),
    )?;

    if warnings.contains(&Warning::MaxRecursionDepthReached) {
        warn!(tour = name, "plan contains over-budget sub-tours");
    }
    info!(
        tour = name,
        sub_tours = children.len(),
        quarantined = quarantined.len(),
        stops = stops.len(),
        "tour split"
    );

    let mut parent = Tour::new(name, all_stops, metrics, backend_used);
    parent.is_split = children.len() > 1;
    parent.validated = quarantined.is_empty();
    parent.children = children;
    parent.warnings = warnings;
    parent.quarantined = quarantined;
    Ok(parent)
}

fn validate_stops(stops: &[Stop], depot: Point) -> Result<(), PlannerError> {
    if !is_valid_point(depot) {
        return Err(PlannerError::InvalidCoordinate {
            id: "depot".to_string(),
            lat: depot.0,
            lon: depot.1,
        });
    }
    for stop in stops {
        if let Some((lat, lon)) = stop.location {
            if !is_valid_point((lat, lon)) {
                return Err(PlannerError::InvalidCoordinate {
                    id: stop.id.clone(),
                    lat,
                    lon,
                });
            }
        }
    }
    Ok(())
}
