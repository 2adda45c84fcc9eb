//! Time-box enforcement by recursive tour splitting.
//!
//! A tour that fits its budgets is kept whole. Otherwise stops are packed
//! greedily, in input order, into sub-tours whose incremental local cost
//! stays within the budget. Each sub-tour is re-estimated and split again
//! if it still does not fit, up to `max_depth` levels.

use tracing::{debug, warn};

use crate::error::PlannerError;
use crate::estimator::{TourEstimate, TourTimeEstimator};
use crate::model::{Point, Stop, Tour, Warning, push_warning, verify_same_stops};

/// Slack for floating-point comparisons against budgets, in minutes.
const BUDGET_EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeboxConfig {
    pub max_without_return_min: f64,
    /// `None` disables the with-return check.
    pub max_with_return_min: Option<f64>,
    pub max_stops: Option<usize>,
    pub max_depth: usize,
}

impl Default for TimeboxConfig {
    fn default() -> Self {
        Self {
            max_without_return_min: 65.0,
            max_with_return_min: Some(90.0),
            max_stops: None,
            max_depth: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TourSplitter {
    estimator: TourTimeEstimator,
    depot: Point,
    config: TimeboxConfig,
}

impl TourSplitter {
    pub fn new(estimator: TourTimeEstimator, depot: Point, config: TimeboxConfig) -> Self {
        Self {
            estimator,
            depot,
            config,
        }
    }

    pub fn config(&self) -> &TimeboxConfig {
        &self.config
    }

    /// Splits `stops` into sub-tours, in the order stops were consumed.
    ///
    /// Stops without coordinates go to the first sub-tour. The result is
    /// checked to contain exactly the input stops.
    pub fn split(&self, name: &str, stops: &[Stop]) -> Result<Vec<Tour>, PlannerError> {
        let (located, unlocated): (Vec<Stop>, Vec<Stop>) =
            stops.iter().cloned().partition(Stop::is_located);

        let mut tours = self.split_at_depth(located, 0);

        if !unlocated.is_empty() {
            warn!(
                tour = name,
                count = unlocated.len(),
                "stops without coordinates appended to first sub-tour"
            );
            match tours.first_mut() {
                Some(first) => {
                    first.stops.extend(unlocated);
                    let estimate = self.estimator.estimate(&first.stops, self.depot);
                    first.metrics = estimate.metrics();
                    push_warning(&mut first.warnings, Warning::StopsWithoutCoordinatesAppended);
                }
                None => {
                    let estimate = self.estimator.estimate(&unlocated, self.depot);
                    let mut tour = materialize(unlocated, estimate);
                    push_warning(&mut tour.warnings, Warning::StopsWithoutCoordinatesAppended);
                    tours.push(tour);
                }
            }
        }

        let count = tours.len();
        for (i, tour) in tours.iter_mut().enumerate() {
            tour.name = if count > 1 {
                format!("{} {}/{}", name, i + 1, count)
            } else {
                name.to_string()
            };
        }

        verify_same_stops(name, stops, tours.iter().flat_map(|t| t.stops.iter()))?;
        for tour in &mut tours {
            tour.validated = true;
        }

        debug!(tour = name, stops = stops.len(), sub_tours = count, "time box enforced");
        Ok(tours)
    }

    fn split_at_depth(&self, stops: Vec<Stop>, depth: usize) -> Vec<Tour> {
        if stops.is_empty() {
            return Vec::new();
        }

        let estimate = self.estimator.estimate(&stops, self.depot);
        if self.fits(&estimate, stops.len()) {
            return vec![materialize(stops, estimate)];
        }

        if depth >= self.config.max_depth {
            warn!(
                depth,
                stops = stops.len(),
                minutes = estimate.total_without_return(),
                "max recursion depth reached, keeping over-budget tour"
            );
            let mut tour = materialize(stops, estimate);
            push_warning(&mut tour.warnings, Warning::MaxRecursionDepthReached);
            return vec![tour];
        }

        if stops.len() == 1 {
            let mut tour = materialize(stops, estimate);
            push_warning(&mut tour.warnings, Warning::SingleStopExceedsBudget);
            return vec![tour];
        }

        let mut chunks = self.greedy_chunks(stops);
        if chunks.len() == 1 {
            // The incremental estimate accepted everything the full estimate
            // rejects; halve so every level shrinks.
            let mut whole = chunks.remove(0);
            let tail = whole.split_off(whole.len() / 2);
            chunks = vec![whole, tail];
        }

        debug!(depth, chunks = chunks.len(), "splitting over-budget tour");
        chunks
            .into_iter()
            .flat_map(|chunk| self.split_at_depth(chunk, depth + 1))
            .collect()
    }

    fn fits(&self, estimate: &TourEstimate, stop_count: usize) -> bool {
        let within_time = estimate.total_without_return() <= self.config.max_without_return_min + BUDGET_EPS;
        let within_total = self
            .config
            .max_with_return_min
            .is_none_or(|limit| estimate.total_with_return() <= limit + BUDGET_EPS);
        let within_count = self.config.max_stops.is_none_or(|max| stop_count <= max);
        within_time && within_total && within_count
    }

    /// Packs located stops in input order. A new chunk starts at the depot.
    fn greedy_chunks(&self, stops: Vec<Stop>) -> Vec<Vec<Stop>> {
        let local = self.estimator.local();
        let budget = self.config.max_without_return_min;
        let mut chunks = Vec::new();
        let mut current: Vec<Stop> = Vec::new();
        let mut elapsed = 0.0;
        let mut previous = self.depot;

        for stop in stops {
            let Some(location) = stop.location else {
                current.push(stop);
                continue;
            };
            let service = self.estimator.service_minutes(&stop);
            let cost = local.leg_minutes(previous, location) + service;
            let over_time = elapsed + cost > budget + BUDGET_EPS;
            let over_count = self.config.max_stops.is_some_and(|max| current.len() >= max);

            if !current.is_empty() && (over_time || over_count) {
                chunks.push(std::mem::take(&mut current));
                elapsed = local.leg_minutes(self.depot, location) + service;
            } else {
                elapsed += cost;
            }
            current.push(stop);
            previous = location;
        }

        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }
}

fn materialize(stops: Vec<Stop>, estimate: TourEstimate) -> Tour {
    let mut tour = Tour::new(String::new(), stops, estimate.metrics(), estimate.backend_used);
    tour.warnings = estimate.warnings;
    tour
}
