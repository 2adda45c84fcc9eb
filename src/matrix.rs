//! All-pairs travel matrix.
//!
//! Indices are positions in the coordinate list the matrix was built from,
//! not stop identifiers. Callers keep the parallel index.

use serde::Serialize;

use crate::error::ProviderError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistanceMatrix {
    durations_s: Vec<Vec<f64>>,
    distances_m: Vec<Vec<f64>>,
}

impl DistanceMatrix {
    /// Builds a matrix from square duration (seconds) and distance (meters) rows.
    pub fn from_rows(
        durations_s: Vec<Vec<f64>>,
        distances_m: Vec<Vec<f64>>,
    ) -> Result<Self, ProviderError> {
        let n = durations_s.len();
        if distances_m.len() != n {
            return Err(ProviderError::Parse(format!(
                "distance rows {} do not match duration rows {}",
                distances_m.len(),
                n
            )));
        }
        for (i, (d, m)) in durations_s.iter().zip(distances_m.iter()).enumerate() {
            if d.len() != n || m.len() != n {
                return Err(ProviderError::Parse(format!("row {i} is not of length {n}")));
            }
            if let Some(j) = d.iter().position(|v| !v.is_finite() || *v < 0.0) {
                return Err(ProviderError::Parse(format!("invalid duration at ({i}, {j})")));
            }
        }
        Ok(Self {
            durations_s,
            distances_m,
        })
    }

    /// Builds a matrix from durations alone; distances are left at zero.
    pub fn from_durations(durations_s: Vec<Vec<f64>>) -> Result<Self, ProviderError> {
        let n = durations_s.len();
        Self::from_rows(durations_s, vec![vec![0.0; n]; n])
    }

    /// An all-zero matrix of size `n`.
    pub fn zeros(n: usize) -> Self {
        Self {
            durations_s: vec![vec![0.0; n]; n],
            distances_m: vec![vec![0.0; n]; n],
        }
    }

    pub fn len(&self) -> usize {
        self.durations_s.len()
    }

    pub fn is_empty(&self) -> bool {
        self.durations_s.is_empty()
    }

    pub fn duration_s(&self, from: usize, to: usize) -> f64 {
        self.durations_s[from][to]
    }

    pub fn duration_min(&self, from: usize, to: usize) -> f64 {
        self.durations_s[from][to] / 60.0
    }

    pub fn distance_km(&self, from: usize, to: usize) -> f64 {
        self.distances_m[from][to] / 1000.0
    }

    pub fn durations(&self) -> &[Vec<f64>] {
        &self.durations_s
    }

    /// Sum of consecutive leg durations along `order`, without a return leg.
    pub fn path_duration_s(&self, order: &[usize]) -> f64 {
        order
            .windows(2)
            .map(|w| self.durations_s[w[0]][w[1]])
            .sum()
    }

    pub fn is_symmetric(&self, tolerance: f64) -> bool {
        let n = self.len();
        (0..n).all(|i| {
            (i + 1..n).all(|j| (self.durations_s[i][j] - self.durations_s[j][i]).abs() <= tolerance)
        })
    }
}
