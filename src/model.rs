//! Domain types handed to and returned from the planner.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::backend::BackendKind;
use crate::error::PlannerError;

/// Geographic point as (latitude, longitude) in degrees.
pub type Point = (f64, f64);

/// A delivery stop. Immutable once handed to the planner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stop {
    pub id: String,
    pub name: String,
    /// None until geocoded.
    pub location: Option<Point>,
    /// Overrides the default per-stop service time.
    pub service_minutes: Option<f64>,
    /// Minutes from midnight. Advisory only, the solver does not enforce it.
    pub time_window: Option<(u32, u32)>,
}

impl Stop {
    pub fn new(id: impl Into<String>, lat: f64, lon: f64) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            location: Some((lat, lon)),
            service_minutes: None,
            time_window: None,
        }
    }

    /// A stop that has not been geocoded yet.
    pub fn unlocated(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            location: None,
            service_minutes: None,
            time_window: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_service_minutes(mut self, minutes: f64) -> Self {
        self.service_minutes = Some(minutes);
        self
    }

    pub fn with_time_window(mut self, start_min: u32, end_min: u32) -> Self {
        self.time_window = Some((start_min, end_min));
        self
    }

    pub fn is_located(&self) -> bool {
        self.location.is_some()
    }
}

/// Returns true if the coordinate lies within valid lat/lon ranges.
pub fn is_valid_point((lat, lon): Point) -> bool {
    lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

/// Annotations attached to degraded-but-usable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Warning {
    #[serde(rename = "degraded_to_local_matrix")]
    DegradedToLocalMatrix,
    #[serde(rename = "degraded_to_local_route")]
    DegradedToLocalRoute,
    #[serde(rename = "quality_floor_using_nearest_neighbor")]
    QualityFloorUsingNearestNeighbor,
    #[serde(rename = "exact_solver_failed_fallback_to_nn_2opt")]
    ExactSolverFailed,
    #[serde(rename = "large_instance_using_nn_2opt")]
    LargeInstanceUsingNnTwoOpt,
    #[serde(rename = "too_few_stops")]
    TooFewStops,
    #[serde(rename = "max_recursion_depth_reached")]
    MaxRecursionDepthReached,
    #[serde(rename = "single_stop_exceeds_budget")]
    SingleStopExceedsBudget,
    #[serde(rename = "stops_without_coordinates_appended")]
    StopsWithoutCoordinatesAppended,
    #[serde(rename = "tour_quarantined")]
    TourQuarantined,
}

impl Warning {
    pub fn as_str(&self) -> &'static str {
        match self {
            Warning::DegradedToLocalMatrix => "degraded_to_local_matrix",
            Warning::DegradedToLocalRoute => "degraded_to_local_route",
            Warning::QualityFloorUsingNearestNeighbor => "quality_floor_using_nearest_neighbor",
            Warning::ExactSolverFailed => "exact_solver_failed_fallback_to_nn_2opt",
            Warning::LargeInstanceUsingNnTwoOpt => "large_instance_using_nn_2opt",
            Warning::TooFewStops => "too_few_stops",
            Warning::MaxRecursionDepthReached => "max_recursion_depth_reached",
            Warning::SingleStopExceedsBudget => "single_stop_exceeds_budget",
            Warning::StopsWithoutCoordinatesAppended => "stops_without_coordinates_appended",
            Warning::TourQuarantined => "tour_quarantined",
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pushes `warning` unless it is already present.
pub(crate) fn push_warning(warnings: &mut Vec<Warning>, warning: Warning) {
    if !warnings.contains(&warning) {
        warnings.push(warning);
    }
}

/// Time figures for one tour, all in minutes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TourMetrics {
    /// Depot to first stop through the last stop, no return leg.
    pub driving_time_min: f64,
    pub service_time_min: f64,
    /// Last stop back to the depot.
    pub return_time_min: f64,
    pub total_without_return: f64,
    pub total_with_return: f64,
}

impl TourMetrics {
    pub fn new(driving_time_min: f64, service_time_min: f64, return_time_min: f64) -> Self {
        let total_without_return = driving_time_min + service_time_min;
        Self {
            driving_time_min,
            service_time_min,
            return_time_min,
            total_without_return,
            total_with_return: total_without_return + return_time_min,
        }
    }
}

/// A materialized tour, possibly the parent of split sub-tours.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tour {
    pub name: String,
    pub stops: Vec<Stop>,
    pub metrics: TourMetrics,
    /// True once the stop set has been checked against the input.
    pub validated: bool,
    pub is_split: bool,
    pub children: Vec<Tour>,
    pub warnings: Vec<Warning>,
    pub backend_used: BackendKind,
    /// Partitions withheld from the plan because their output failed the
    /// stop-set check.
    pub quarantined: Vec<QuarantinedTour>,
}

/// A failed partition. Its stops are not part of any returned tour.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuarantinedTour {
    pub name: String,
    pub stops: Vec<Stop>,
    pub reason: String,
}

impl Tour {
    pub fn new(name: impl Into<String>, stops: Vec<Stop>, metrics: TourMetrics, backend_used: BackendKind) -> Self {
        Self {
            name: name.into(),
            stops,
            metrics,
            validated: false,
            is_split: false,
            children: Vec::new(),
            warnings: Vec::new(),
            backend_used,
            quarantined: Vec::new(),
        }
    }

    pub fn stop_count(&self) -> usize {
        self.stops.len()
    }

    pub fn estimated_time_minutes(&self) -> f64 {
        self.metrics.total_without_return
    }

    pub fn estimated_return_time_minutes(&self) -> f64 {
        self.metrics.return_time_min
    }

    pub fn estimated_total_with_return_minutes(&self) -> f64 {
        self.metrics.total_with_return
    }

    pub fn stop_ids(&self) -> impl Iterator<Item = &str> {
        self.stops.iter().map(|s| s.id.as_str())
    }

    /// Stops of this tour, or of its children when it was split.
    pub fn leaf_stops(&self) -> Vec<&Stop> {
        if self.children.is_empty() {
            self.stops.iter().collect()
        } else {
            self.children.iter().flat_map(|c| c.leaf_stops()).collect()
        }
    }
}

/// A geographic partition of stops with its centroid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    pub id: usize,
    pub label: String,
    pub stops: Vec<Stop>,
    /// None when no member has coordinates.
    pub centroid: Option<Point>,
}

impl Cluster {
    pub fn new(id: usize, label: impl Into<String>, stops: Vec<Stop>) -> Self {
        let centroid = centroid(&stops);
        Self {
            id,
            label: label.into(),
            stops,
            centroid,
        }
    }
}

/// Mean coordinate of the located stops.
pub fn centroid(stops: &[Stop]) -> Option<Point> {
    let located: Vec<Point> = stops.iter().filter_map(|s| s.location).collect();
    if located.is_empty() {
        return None;
    }
    let n = located.len() as f64;
    let (lat, lon) = located
        .iter()
        .fold((0.0, 0.0), |(a, b), (lat, lon)| (a + lat, b + lon));
    Some((lat / n, lon / n))
}

/// Checks that `output` holds exactly the stop ids of `input`, counting
/// duplicates.
pub fn verify_same_stops<'a>(
    tour: &str,
    input: impl IntoIterator<Item = &'a Stop>,
    output: impl IntoIterator<Item = &'a Stop>,
) -> Result<(), PlannerError> {
    let mut balance: BTreeMap<&str, i64> = BTreeMap::new();
    for stop in input {
        *balance.entry(stop.id.as_str()).or_insert(0) += 1;
    }
    for stop in output {
        *balance.entry(stop.id.as_str()).or_insert(0) -= 1;
    }

    let mut missing = Vec::new();
    let mut unexpected = Vec::new();
    for (id, count) in balance {
        if count > 0 {
            missing.push(id.to_string());
        } else if count < 0 {
            unexpected.push(id.to_string());
        }
    }

    if missing.is_empty() && unexpected.is_empty() {
        Ok(())
    } else {
        Err(PlannerError::Validation {
            tour: tour.to_string(),
            missing,
            unexpected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_totals() {
        let m = TourMetrics::new(40.0, 10.0, 15.0);
        assert_eq!(m.total_without_return, 50.0);
        assert_eq!(m.total_with_return, 65.0);
    }

    #[test]
    fn test_point_validation() {
        assert!(is_valid_point((51.05, 13.73)));
        assert!(!is_valid_point((91.0, 13.73)));
        assert!(!is_valid_point((51.0, -181.0)));
        assert!(!is_valid_point((f64::NAN, 0.0)));
    }

    #[test]
    fn test_centroid_ignores_unlocated() {
        let stops = vec![
            Stop::new("a", 51.0, 13.0),
            Stop::new("b", 52.0, 14.0),
            Stop::unlocated("c"),
        ];
        assert_eq!(centroid(&stops), Some((51.5, 13.5)));
        assert_eq!(centroid(&[Stop::unlocated("x")]), None);
    }

    #[test]
    fn test_verify_same_stops() {
        let input = vec![Stop::new("a", 51.0, 13.0), Stop::new("b", 51.1, 13.1)];
        let reordered = vec![input[1].clone(), input[0].clone()];
        assert!(verify_same_stops("t", &input, &reordered).is_ok());

        let duplicated = vec![input[0].clone(), input[0].clone()];
        match verify_same_stops("t", &input, &duplicated) {
            Err(PlannerError::Validation { missing, unexpected, .. }) => {
                assert_eq!(missing, vec!["b".to_string()]);
                assert_eq!(unexpected, vec!["a".to_string()]);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_warning_serializes_as_tag() {
        let json = serde_json::to_string(&Warning::ExactSolverFailed).unwrap();
        assert_eq!(json, "\"exact_solver_failed_fallback_to_nn_2opt\"");
        assert_eq!(Warning::DegradedToLocalMatrix.to_string(), "degraded_to_local_matrix");
    }
}
