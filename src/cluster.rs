//! Proximity clustering around the depot.
//!
//! Stops are sorted by distance from the depot and packed greedily into
//! clusters bounded by stop count and round-trip time. The limits are looser
//! than the tour time box; the time box still runs per cluster afterwards.

use crate::haversine::{HaversineProvider, haversine_km};
use crate::model::{Cluster, Point, Stop};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterParams {
    pub max_stops_per_cluster: usize,
    /// Depot to depot, including service time.
    pub max_time_per_cluster_min: f64,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            max_stops_per_cluster: 15,
            max_time_per_cluster_min: 120.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProximityClusterer {
    params: ClusterParams,
    local: HaversineProvider,
    service_minutes_per_stop: f64,
}

impl ProximityClusterer {
    pub fn new(params: ClusterParams, local: HaversineProvider, service_minutes_per_stop: f64) -> Self {
        Self {
            params,
            local,
            service_minutes_per_stop,
        }
    }

    /// Deterministic for a given input order; ties in distance keep input
    /// order. Stops without coordinates join the first cluster.
    pub fn cluster(&self, stops: &[Stop], depot: Point) -> Vec<Cluster> {
        let mut located: Vec<(f64, &Stop, Point)> = stops
            .iter()
            .filter_map(|s| s.location.map(|p| (haversine_km(depot, p), s, p)))
            .collect();
        located.sort_by(|a, b| a.0.total_cmp(&b.0));

        let max_stops = self.params.max_stops_per_cluster.max(1);
        let mut groups: Vec<Vec<Stop>> = Vec::new();
        let mut current: Vec<Stop> = Vec::new();
        let mut drive = 0.0;
        let mut service = 0.0;
        let mut last = depot;

        for (_, stop, location) in located {
            let stop_service = stop.service_minutes.unwrap_or(self.service_minutes_per_stop);
            let leg = self.local.leg_minutes(last, location);
            let round_trip = drive + leg + self.local.leg_minutes(location, depot) + service + stop_service;

            if !current.is_empty()
                && (current.len() >= max_stops || round_trip > self.params.max_time_per_cluster_min)
            {
                groups.push(std::mem::take(&mut current));
                drive = self.local.leg_minutes(depot, location);
                service = stop_service;
            } else {
                drive += leg;
                service += stop_service;
            }
            current.push(stop.clone());
            last = location;
        }
        if !current.is_empty() {
            groups.push(current);
        }

        let unlocated: Vec<Stop> = stops.iter().filter(|s| !s.is_located()).cloned().collect();
        if !unlocated.is_empty() {
            match groups.first_mut() {
                Some(first) => first.extend(unlocated),
                None => groups.push(unlocated),
            }
        }

        groups
            .into_iter()
            .enumerate()
            .map(|(id, members)| Cluster::new(id, format!("C{}", id + 1), members))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::haversine::SpeedProfile;

    const DEPOT: Point = (51.0111988, 13.7016485);

    fn clusterer(params: ClusterParams) -> ProximityClusterer {
        ProximityClusterer::new(params, HaversineProvider::new(SpeedProfile::Suburban, 1.3), 2.0)
    }

    #[test]
    fn test_nearest_stops_cluster_first() {
        let stops = vec![
            Stop::new("far", 51.20, 13.70),
            Stop::new("near", 51.02, 13.70),
            Stop::new("mid", 51.08, 13.70),
        ];
        let clusters = clusterer(ClusterParams::default()).cluster(&stops, DEPOT);
        assert_eq!(clusters.len(), 1);
        let ids: Vec<&str> = clusters[0].stops.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid", "far"]);
    }

    #[test]
    fn test_stop_limit_starts_new_cluster() {
        let stops: Vec<Stop> = (0..7)
            .map(|i| Stop::new(format!("s{i}"), 51.02 + 0.001 * i as f64, 13.70))
            .collect();
        let params = ClusterParams {
            max_stops_per_cluster: 3,
            max_time_per_cluster_min: 1000.0,
        };
        let clusters = clusterer(params).cluster(&stops, DEPOT);
        let sizes: Vec<usize> = clusters.iter().map(|c| c.stops.len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(clusters[2].label, "C3");
    }

    #[test]
    fn test_time_limit_starts_new_cluster() {
        let stops = vec![Stop::new("a", 51.30, 13.70), Stop::new("b", 50.70, 13.70)];
        let params = ClusterParams {
            max_stops_per_cluster: 15,
            max_time_per_cluster_min: 60.0,
        };
        let clusters = clusterer(params).cluster(&stops, DEPOT);
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn test_union_preserved_with_unlocated() {
        let stops = vec![
            Stop::new("a", 51.05, 13.73),
            Stop::unlocated("u"),
            Stop::new("b", 51.06, 13.74),
        ];
        let clusters = clusterer(ClusterParams::default()).cluster(&stops, DEPOT);
        let total: usize = clusters.iter().map(|c| c.stops.len()).sum();
        assert_eq!(total, 3);
        assert!(clusters[0].stops.iter().any(|s| s.id == "u"));
    }
}
