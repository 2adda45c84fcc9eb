//! Route ordering over a travel matrix.
//!
//! The path is open and starts at index 0. Small instances are solved
//! exactly (Held-Karp), larger ones with nearest neighbor plus time-boxed
//! 2-opt. A quality floor keeps the nearest-neighbor order whenever the
//! improvement is marginal, so near-identical inputs give the same order.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::matrix::DistanceMatrix;
use crate::model::{Warning, push_warning};

/// Moves must improve by more than this many seconds.
const IMPROVEMENT_EPS: f64 = 1e-6;

/// Held-Karp allocates `2^(n-1) * (n-1)` cells; never go past this.
const HELD_KARP_MAX_POINTS: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct SolverConfig {
    /// Instances up to this many points are solved exactly.
    pub exact_max_points: usize,
    pub exact_time_limit: Duration,
    pub medium_max_points: usize,
    pub medium_time_budget: Duration,
    pub large_time_budget: Duration,
    /// Minimum gain over nearest neighbor, in percent, to keep a solved order.
    pub quality_floor_pct: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            exact_max_points: 12,
            exact_time_limit: Duration::from_secs(3),
            medium_max_points: 80,
            medium_time_budget: Duration::from_millis(1200),
            large_time_budget: Duration::from_secs(2),
            quality_floor_pct: 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SolverKind {
    #[serde(rename = "exact")]
    Exact,
    #[serde(rename = "nn_2opt")]
    NnTwoOpt,
    #[serde(rename = "identity")]
    Identity,
}

impl SolverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolverKind::Exact => "exact",
            SolverKind::NnTwoOpt => "nn_2opt",
            SolverKind::Identity => "identity",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Normal,
    /// The solved order was discarded for the nearest-neighbor baseline.
    Floor,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSolution {
    /// Matrix indices, starting with 0.
    pub order: Vec<usize>,
    pub duration_s: f64,
    pub baseline_duration_s: f64,
    /// Gain of `order` over the nearest-neighbor baseline.
    pub gain_pct: f64,
    pub solver: SolverKind,
    pub quality: Quality,
    pub elapsed_ms: u64,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, Default)]
pub struct RouteSolver {
    config: SolverConfig,
}

impl RouteSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn solve(&self, matrix: &DistanceMatrix) -> RouteSolution {
        let started = Instant::now();
        let n = matrix.len();
        let mut warnings = Vec::new();

        if n <= 2 {
            push_warning(&mut warnings, Warning::TooFewStops);
            let order: Vec<usize> = (0..n).collect();
            let duration_s = matrix.path_duration_s(&order);
            return RouteSolution {
                order,
                duration_s,
                baseline_duration_s: duration_s,
                gain_pct: 0.0,
                solver: SolverKind::Identity,
                quality: Quality::Normal,
                elapsed_ms: started.elapsed().as_millis() as u64,
                warnings,
            };
        }

        let baseline = nearest_neighbor(matrix);
        let baseline_duration_s = matrix.path_duration_s(&baseline);

        let (solved, solver) = if n <= self.config.exact_max_points {
            match held_karp(matrix, started + self.config.exact_time_limit) {
                Some(order) => (order, SolverKind::Exact),
                None => {
                    push_warning(&mut warnings, Warning::ExactSolverFailed);
                    let budget = Instant::now() + self.config.medium_time_budget;
                    (improved_baseline(matrix, &baseline, budget), SolverKind::NnTwoOpt)
                }
            }
        } else if n <= self.config.medium_max_points {
            let budget = started + self.config.medium_time_budget;
            (improved_baseline(matrix, &baseline, budget), SolverKind::NnTwoOpt)
        } else {
            push_warning(&mut warnings, Warning::LargeInstanceUsingNnTwoOpt);
            let budget = started + self.config.large_time_budget;
            (improved_baseline(matrix, &baseline, budget), SolverKind::NnTwoOpt)
        };

        let solved_duration_s = matrix.path_duration_s(&solved);
        let gain_pct = gain_pct(baseline_duration_s, solved_duration_s);

        let (order, duration_s, quality, gain_pct) = if gain_pct < self.config.quality_floor_pct {
            push_warning(&mut warnings, Warning::QualityFloorUsingNearestNeighbor);
            (baseline, baseline_duration_s, Quality::Floor, 0.0)
        } else {
            (solved, solved_duration_s, Quality::Normal, gain_pct)
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(
            points = n,
            solver = solver.as_str(),
            gain_pct,
            elapsed_ms,
            floor = quality == Quality::Floor,
            "route solved"
        );

        RouteSolution {
            order,
            duration_s,
            baseline_duration_s,
            gain_pct,
            solver,
            quality,
            elapsed_ms,
            warnings,
        }
    }
}

fn gain_pct(baseline: f64, solved: f64) -> f64 {
    if baseline <= 0.0 {
        0.0
    } else {
        (baseline - solved) / baseline * 100.0
    }
}

fn improved_baseline(matrix: &DistanceMatrix, baseline: &[usize], deadline: Instant) -> Vec<usize> {
    let mut order = baseline.to_vec();
    two_opt(matrix, &mut order, deadline);
    order
}

/// Greedy closest-unvisited path from index 0. Ties go to the lower index.
pub fn nearest_neighbor(matrix: &DistanceMatrix) -> Vec<usize> {
    let n = matrix.len();
    if n == 0 {
        return Vec::new();
    }
    let mut visited = vec![false; n];
    let mut order = Vec::with_capacity(n);
    let mut current = 0;
    visited[0] = true;
    order.push(0);

    while order.len() < n {
        let mut best: Option<(usize, f64)> = None;
        for (candidate, seen) in visited.iter().enumerate() {
            if *seen {
                continue;
            }
            let cost = matrix.duration_s(current, candidate);
            if best.is_none_or(|(_, c)| cost < c) {
                best = Some((candidate, cost));
            }
        }
        let Some((next, _)) = best else { break };
        visited[next] = true;
        order.push(next);
        current = next;
    }

    order
}

/// First-improvement 2-opt on an open path with a fixed first element.
///
/// Restarts the scan after every applied move and stops when a full pass
/// finds nothing or `deadline` passes. Returns the number of moves applied.
pub fn two_opt(matrix: &DistanceMatrix, order: &mut [usize], deadline: Instant) -> usize {
    let n = order.len();
    if n < 4 {
        return 0;
    }
    let symmetric = matrix.is_symmetric(IMPROVEMENT_EPS);
    let mut moves = 0;

    'search: loop {
        for i in 0..n - 2 {
            if Instant::now() >= deadline {
                break 'search;
            }
            for j in i + 2..n {
                if reversal_delta(matrix, order, i, j, symmetric) < -IMPROVEMENT_EPS {
                    order[i + 1..=j].reverse();
                    moves += 1;
                    continue 'search;
                }
            }
        }
        break;
    }

    moves
}

/// Cost change of reversing `order[i + 1..=j]`.
fn reversal_delta(matrix: &DistanceMatrix, order: &[usize], i: usize, j: usize, symmetric: bool) -> f64 {
    let a = order[i];
    let b = order[i + 1];
    let c = order[j];
    let mut before = matrix.duration_s(a, b);
    let mut after = matrix.duration_s(a, c);
    if let Some(&d) = order.get(j + 1) {
        before += matrix.duration_s(c, d);
        after += matrix.duration_s(b, d);
    }
    if !symmetric {
        for k in i + 1..j {
            before += matrix.duration_s(order[k], order[k + 1]);
            after += matrix.duration_s(order[k + 1], order[k]);
        }
    }
    after - before
}

/// Exact shortest open path from index 0 through every point.
///
/// Returns `None` if `deadline` passes or the instance is too large.
pub fn held_karp(matrix: &DistanceMatrix, deadline: Instant) -> Option<Vec<usize>> {
    let n = matrix.len();
    if n <= 2 {
        return Some((0..n).collect());
    }
    if n > HELD_KARP_MAX_POINTS {
        return None;
    }

    // Point `p` (1..n) is bit `p - 1`.
    let m = n - 1;
    let full = (1usize << m) - 1;
    let mut cost = vec![f64::INFINITY; (full + 1) * m];
    let mut parent = vec![usize::MAX; (full + 1) * m];

    for j in 0..m {
        cost[(1 << j) * m + j] = matrix.duration_s(0, j + 1);
    }

    for mask in 1..=full {
        if mask % 64 == 0 && Instant::now() >= deadline {
            return None;
        }
        for j in 0..m {
            if mask & (1 << j) == 0 {
                continue;
            }
            let base = cost[mask * m + j];
            if !base.is_finite() {
                continue;
            }
            for k in 0..m {
                if mask & (1 << k) != 0 {
                    continue;
                }
                let next = mask | (1 << k);
                let candidate = base + matrix.duration_s(j + 1, k + 1);
                if candidate < cost[next * m + k] {
                    cost[next * m + k] = candidate;
                    parent[next * m + k] = j;
                }
            }
        }
    }

    let mut last = (0..m)
        .filter(|j| cost[full * m + j].is_finite())
        .min_by(|a, b| cost[full * m + a].total_cmp(&cost[full * m + b]))?;

    let mut order = Vec::with_capacity(n);
    let mut mask = full;
    loop {
        order.push(last + 1);
        let prev = parent[mask * m + last];
        mask &= !(1 << last);
        if prev == usize::MAX {
            break;
        }
        last = prev;
    }
    order.push(0);
    order.reverse();
    Some(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Points on a line; duration equals absolute distance.
    fn line(positions: &[f64]) -> DistanceMatrix {
        let rows = positions
            .iter()
            .map(|a| positions.iter().map(|b| (a - b).abs()).collect())
            .collect();
        DistanceMatrix::from_durations(rows).unwrap()
    }

    #[test]
    fn test_nearest_neighbor_order() {
        let m = line(&[0.0, 1.0, -2.0, 4.0, -8.0]);
        assert_eq!(nearest_neighbor(&m), vec![0, 1, 2, 3, 4]);
        assert_eq!(m.path_duration_s(&[0, 1, 2, 3, 4]), 22.0);
    }

    #[test]
    fn test_held_karp_is_optimal() {
        let m = line(&[0.0, 1.0, -2.0, 4.0, -8.0]);
        let order = held_karp(&m, Instant::now() + Duration::from_secs(1)).unwrap();
        assert_eq!(order[0], 0);
        assert_eq!(order.len(), 5);
        assert_eq!(m.path_duration_s(&order), 16.0);
    }

    #[test]
    fn test_held_karp_respects_deadline() {
        let positions: Vec<f64> = (0..14).map(|i| i as f64).collect();
        let m = line(&positions);
        assert!(held_karp(&m, Instant::now() - Duration::from_millis(1)).is_none());
    }

    #[test]
    fn test_two_opt_untangles_crossing() {
        // Square corners visited in crossing order.
        let pts = [(0.0, 0.0), (1.0, 1.0), (1.0, 0.0), (0.0, 1.0), (0.0, 2.0)];
        let rows = pts
            .iter()
            .map(|a: &(f64, f64)| {
                pts.iter()
                    .map(|b| ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt())
                    .collect()
            })
            .collect();
        let m = DistanceMatrix::from_durations(rows).unwrap();
        let mut order = vec![0, 1, 2, 3, 4];
        let before = m.path_duration_s(&order);
        let moves = two_opt(&m, &mut order, Instant::now() + Duration::from_secs(1));
        assert!(moves > 0);
        assert!(m.path_duration_s(&order) < before);
        assert_eq!(order[0], 0);
    }

    #[test]
    fn test_two_opt_asymmetric_uses_exact_delta() {
        let rows = vec![
            vec![0.0, 1.0, 10.0, 10.0],
            vec![10.0, 0.0, 1.0, 10.0],
            vec![10.0, 10.0, 0.0, 1.0],
            vec![1.0, 10.0, 10.0, 0.0],
        ];
        let m = DistanceMatrix::from_durations(rows).unwrap();
        let mut order = vec![0, 1, 2, 3];
        two_opt(&m, &mut order, Instant::now() + Duration::from_secs(1));
        assert_eq!(order, vec![0, 1, 2, 3], "reversing would cost more in a one-way ring");
    }

    #[test]
    fn test_solve_exact_keeps_real_gain() {
        let m = line(&[0.0, 1.0, -2.0, 4.0, -8.0]);
        let solution = RouteSolver::default().solve(&m);
        assert_eq!(solution.solver, SolverKind::Exact);
        assert_eq!(solution.quality, Quality::Normal);
        assert_eq!(solution.duration_s, 16.0);
        assert!((solution.gain_pct - 6.0 / 22.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_floor_returns_baseline() {
        let m = line(&[0.0, 1.0, -2.0, 4.0, -8.0]);
        let solver = RouteSolver::new(SolverConfig {
            quality_floor_pct: 50.0,
            ..SolverConfig::default()
        });
        let solution = solver.solve(&m);
        assert_eq!(solution.quality, Quality::Floor);
        assert_eq!(solution.order, nearest_neighbor(&m));
        assert!(solution.warnings.contains(&Warning::QualityFloorUsingNearestNeighbor));
    }

    #[test]
    fn test_too_few_points_is_identity() {
        let m = line(&[0.0, 3.0]);
        let solution = RouteSolver::default().solve(&m);
        assert_eq!(solution.order, vec![0, 1]);
        assert_eq!(solution.solver, SolverKind::Identity);
        assert!(solution.warnings.contains(&Warning::TooFewStops));
        assert!(RouteSolver::default().solve(&line(&[])).order.is_empty());
    }

    #[test]
    fn test_large_instance_uses_heuristic() {
        let positions: Vec<f64> = (0..90).map(|i| ((i * 37) % 90) as f64).collect();
        let m = line(&positions);
        let solution = RouteSolver::default().solve(&m);
        assert_eq!(solution.solver, SolverKind::NnTwoOpt);
        assert!(solution.warnings.contains(&Warning::LargeInstanceUsingNnTwoOpt));
        let mut sorted = solution.order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..90).collect::<Vec<_>>());
    }
}
