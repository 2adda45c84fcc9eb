//! Fixed bearing sectors around the depot.
//!
//! Sector `k` of `n` covers bearings centered on `k * 360/n`, so with four
//! sectors N spans [315, 45), E [45, 135) and so on. A stop exactly on a
//! boundary belongs to the clockwise sector.

use crate::error::PlannerError;
use crate::model::{Cluster, Point, Stop};

const FOUR_SECTORS: [&str; 4] = ["N", "E", "S", "W"];
const EIGHT_SECTORS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SectorPlanParams {
    pub budget_without_return_min: f64,
    /// Hard deadline including the return leg (07:00 start, 09:00 back).
    pub hard_deadline_with_return_min: f64,
    pub max_depth: usize,
}

impl Default for SectorPlanParams {
    fn default() -> Self {
        Self {
            budget_without_return_min: 65.0,
            hard_deadline_with_return_min: 120.0,
            max_depth: 3,
        }
    }
}

/// Initial great-circle bearing from `from` to `to`, in degrees [0, 360).
pub fn bearing_deg(from: Point, to: Point) -> f64 {
    let (lat1, lon1) = (from.0.to_radians(), from.1.to_radians());
    let (lat2, lon2) = (to.0.to_radians(), to.1.to_radians());
    let d_lon = lon2 - lon1;
    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();
    y.atan2(x).to_degrees().rem_euclid(360.0)
}

pub fn sector_labels(count: usize) -> Result<&'static [&'static str], PlannerError> {
    match count {
        4 => Ok(&FOUR_SECTORS),
        8 => Ok(&EIGHT_SECTORS),
        other => Err(PlannerError::UnsupportedSectorCount(other)),
    }
}

pub fn sector_index(bearing: f64, count: usize) -> usize {
    let width = 360.0 / count as f64;
    let shifted = (bearing + width / 2.0).rem_euclid(360.0);
    ((shifted / width).floor() as usize).min(count - 1)
}

/// Buckets stops by bearing from `depot`. Only non-empty sectors are
/// returned, in sector order. Stops without coordinates join the first
/// returned sector.
pub fn partition_by_sector(
    stops: &[Stop],
    depot: Point,
    sector_count: usize,
) -> Result<Vec<Cluster>, PlannerError> {
    let labels = sector_labels(sector_count)?;
    let mut buckets: Vec<Vec<Stop>> = vec![Vec::new(); sector_count];
    let mut unlocated = Vec::new();

    for stop in stops {
        match stop.location {
            Some(location) => {
                let sector = sector_index(bearing_deg(depot, location), sector_count);
                buckets[sector].push(stop.clone());
            }
            None => unlocated.push(stop.clone()),
        }
    }

    if !unlocated.is_empty() {
        let target = buckets.iter().position(|b| !b.is_empty()).unwrap_or(0);
        buckets[target].extend(unlocated);
    }

    Ok(buckets
        .into_iter()
        .enumerate()
        .filter(|(_, members)| !members.is_empty())
        .map(|(id, members)| Cluster::new(id, labels[id], members))
        .collect())
}
