//! Local haversine estimate (fallback when the routing service is unavailable).
//!
//! Uses great-circle distance, inflated by a safety factor for road detours,
//! and an assumed driving speed. Less accurate than a routing service but
//! always available.

use std::time::Instant;

use rayon::prelude::*;

use crate::backend::BackendKind;
use crate::error::ProviderError;
use crate::matrix::DistanceMatrix;
use crate::model::Point;
use crate::polyline::Polyline;
use crate::traits::{DistanceProvider, ProbeOutcome, RouteSummary};

/// Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Road-detour multiplier applied to straight-line distance.
pub const DEFAULT_SAFETY_FACTOR: f64 = 1.3;

/// Great-circle distance between two points in kilometers.
pub fn haversine_km(from: Point, to: Point) -> f64 {
    let (lat1, lng1) = from;
    let (lat2, lng2) = to;

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lng = (lng2 - lng1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    // NaN input stays NaN.
    let c = 2.0 * a.sqrt().clamp(0.0, 1.0).asin();

    EARTH_RADIUS_KM * c
}

/// Assumed average driving speed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeedProfile {
    Urban,
    Suburban,
    Rural,
    Custom(f64),
}

impl SpeedProfile {
    pub fn kmh(&self) -> f64 {
        match self {
            SpeedProfile::Urban => 30.0,
            SpeedProfile::Suburban => 50.0,
            SpeedProfile::Rural => 70.0,
            SpeedProfile::Custom(kmh) => *kmh,
        }
    }
}

/// Haversine-based provider.
#[derive(Debug, Clone, Copy)]
pub struct HaversineProvider {
    pub speed: SpeedProfile,
    pub safety_factor: f64,
}

impl Default for HaversineProvider {
    fn default() -> Self {
        Self {
            speed: SpeedProfile::Urban,
            safety_factor: DEFAULT_SAFETY_FACTOR,
        }
    }
}

impl HaversineProvider {
    pub fn new(speed: SpeedProfile, safety_factor: f64) -> Self {
        Self {
            speed,
            safety_factor,
        }
    }

    /// Estimated road distance in kilometers.
    pub fn road_km(&self, from: Point, to: Point) -> f64 {
        haversine_km(from, to) * self.safety_factor
    }

    /// Convert distance in km to travel time in seconds.
    pub fn km_to_seconds(&self, km: f64) -> f64 {
        km / self.speed.kmh() * 3600.0
    }

    pub fn leg_seconds(&self, from: Point, to: Point) -> f64 {
        self.km_to_seconds(self.road_km(from, to))
    }

    pub fn leg_minutes(&self, from: Point, to: Point) -> f64 {
        self.leg_seconds(from, to) / 60.0
    }

    /// Open-path travel time in minutes over consecutive points.
    pub fn path_minutes(&self, points: &[Point]) -> f64 {
        points
            .windows(2)
            .map(|w| self.leg_minutes(w[0], w[1]))
            .sum()
    }
}

impl DistanceProvider for HaversineProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::LocalHaversine
    }

    fn compute_matrix(&self, coords: &[Point]) -> Result<DistanceMatrix, ProviderError> {
        let rows: Vec<(Vec<f64>, Vec<f64>)> = coords
            .par_iter()
            .enumerate()
            .map(|(i, from)| {
                let mut durations = vec![0.0; coords.len()];
                let mut distances = vec![0.0; coords.len()];
                for (j, to) in coords.iter().enumerate() {
                    if i != j {
                        let km = self.road_km(*from, *to);
                        distances[j] = km * 1000.0;
                        durations[j] = self.km_to_seconds(km);
                    }
                }
                (durations, distances)
            })
            .collect();

        let (durations, distances) = rows.into_iter().unzip();
        DistanceMatrix::from_rows(durations, distances)
    }

    fn compute_route(&self, coords: &[Point]) -> Result<RouteSummary, ProviderError> {
        let km: f64 = coords.windows(2).map(|w| self.road_km(w[0], w[1])).sum();
        Ok(RouteSummary {
            geometry: Polyline::new(coords.to_vec()),
            distance_m: km * 1000.0,
            duration_s: self.km_to_seconds(km),
        })
    }

    fn probe(&self) -> ProbeOutcome {
        let started = Instant::now();
        let sample_ok = self
            .compute_route(&[(51.0493, 13.7381), (51.0639, 13.7522)])
            .map(|route| route.duration_s > 0.0)
            .unwrap_or(false);
        ProbeOutcome {
            reachable: true,
            sample_ok,
            latency_ms: started.elapsed().as_millis() as u64,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_same_point() {
        let dist = haversine_km((51.05, 13.73), (51.05, 13.73));
        assert!(dist < 0.001, "Same point should have ~0 distance");
    }

    #[test]
    fn test_haversine_propagates_nan() {
        assert!(haversine_km((f64::NAN, 13.73), (51.05, 13.73)).is_nan());
    }

    #[test]
    fn test_haversine_known_distance() {
        // Dresden (51.05, 13.74) to Leipzig (51.34, 12.37), roughly 100 km
        let dist = haversine_km((51.05, 13.74), (51.34, 12.37));
        assert!(dist > 95.0 && dist < 105.0, "Dresden to Leipzig should be ~100km, got {}", dist);
    }

    #[test]
    fn test_matrix_diagonal_is_zero() {
        let provider = HaversineProvider::default();
        let locations = vec![(51.05, 13.73), (51.06, 13.74), (51.04, 13.72)];
        let matrix = provider.compute_matrix(&locations).unwrap();

        for i in 0..locations.len() {
            assert_eq!(matrix.duration_s(i, i), 0.0, "Diagonal should be zero");
        }
        assert!(matrix.is_symmetric(1e-9), "Haversine matrix should be symmetric");
    }

    #[test]
    fn test_reasonable_travel_time() {
        let provider = HaversineProvider::new(SpeedProfile::Custom(40.0), 1.0);
        // 10 km at 40 km/h = 0.25 hours = 900 seconds
        assert_eq!(provider.km_to_seconds(10.0).round(), 900.0);
    }

    #[test]
    fn test_safety_factor_scales_duration() {
        let plain = HaversineProvider::new(SpeedProfile::Suburban, 1.0);
        let padded = HaversineProvider::new(SpeedProfile::Suburban, 1.3);
        let a = (51.01, 13.70);
        let b = (51.05, 13.73);
        let ratio = padded.leg_seconds(a, b) / plain.leg_seconds(a, b);
        assert!((ratio - 1.3).abs() < 1e-9);
    }

    #[test]
    fn test_speed_profiles() {
        assert_eq!(SpeedProfile::Urban.kmh(), 30.0);
        assert_eq!(SpeedProfile::Suburban.kmh(), 50.0);
        assert_eq!(SpeedProfile::Rural.kmh(), 70.0);
    }

    #[test]
    fn test_route_is_straight_line_geometry() {
        let provider = HaversineProvider::default();
        let coords = [(51.01, 13.70), (51.05, 13.73), (51.06, 13.74)];
        let route = provider.compute_route(&coords).unwrap();
        assert_eq!(route.geometry.points(), &coords[..]);
        let expected_s = (provider.leg_seconds(coords[0], coords[1])
            + provider.leg_seconds(coords[1], coords[2]))
            .round();
        assert_eq!(route.duration_s.round(), expected_s);
    }

    #[test]
    fn test_empty_input_is_ok() {
        let provider = HaversineProvider::default();
        assert!(provider.compute_matrix(&[]).unwrap().is_empty());
        assert_eq!(provider.compute_route(&[]).unwrap().duration_s, 0.0);
    }
}
