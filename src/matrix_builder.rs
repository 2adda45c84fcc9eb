//! Builds travel matrices through the backend manager, never failing the
//! caller: when every backend fails the local estimate is used directly.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::backend::{BackendKind, BackendManager};
use crate::error::ProviderError;
use crate::haversine::HaversineProvider;
use crate::matrix::DistanceMatrix;
use crate::model::{Point, Warning, push_warning};
use crate::traits::DistanceProvider;

/// A matrix tagged with the backend that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatrixBuild {
    pub matrix: DistanceMatrix,
    pub backend_used: BackendKind,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone)]
pub struct DistanceMatrixBuilder {
    backends: Arc<BackendManager>,
    local: HaversineProvider,
}

impl DistanceMatrixBuilder {
    pub fn new(backends: Arc<BackendManager>, local: HaversineProvider) -> Self {
        Self { backends, local }
    }

    pub fn build(&self, coords: &[Point]) -> MatrixBuild {
        let mut warnings = Vec::new();
        if coords.len() < 2 {
            return MatrixBuild {
                matrix: DistanceMatrix::zeros(coords.len()),
                backend_used: BackendKind::LocalHaversine,
                warnings,
            };
        }

        let attempt = self
            .backends
            .first_success(&self.backends.priority(), "table", |provider| {
                let matrix = provider.compute_matrix(coords)?;
                if matrix.len() != coords.len() {
                    return Err(ProviderError::Parse(format!(
                        "matrix of size {} for {} coordinates",
                        matrix.len(),
                        coords.len()
                    )));
                }
                Ok(matrix)
            });

        let (matrix, backend_used) = match attempt {
            Ok(found) => found,
            Err(err) => {
                warn!(error = %err, points = coords.len(), "all backends failed, using local matrix");
                (self.local_matrix(coords), BackendKind::LocalHaversine)
            }
        };

        if backend_used == BackendKind::LocalHaversine && self.backends.has_remote() {
            push_warning(&mut warnings, Warning::DegradedToLocalMatrix);
        }

        MatrixBuild {
            matrix,
            backend_used,
            warnings,
        }
    }

    fn local_matrix(&self, coords: &[Point]) -> DistanceMatrix {
        self.local.compute_matrix(coords).unwrap_or_else(|err| {
            warn!(error = %err, "local matrix rejected, using zero matrix");
            DistanceMatrix::zeros(coords.len())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::BreakerConfig;
    use crate::metrics::RoutingMetrics;

    fn local_only() -> DistanceMatrixBuilder {
        let mut manager = BackendManager::new(Arc::new(RoutingMetrics::default()));
        manager.register(HaversineProvider::default(), BreakerConfig::always_closed());
        DistanceMatrixBuilder::new(Arc::new(manager), HaversineProvider::default())
    }

    #[test]
    fn test_local_only_has_no_degradation_warning() {
        let build = local_only().build(&[(51.01, 13.70), (51.05, 13.73), (51.06, 13.74)]);
        assert_eq!(build.backend_used, BackendKind::LocalHaversine);
        assert_eq!(build.matrix.len(), 3);
        assert!(build.warnings.is_empty());
    }

    #[test]
    fn test_trivial_inputs() {
        let builder = local_only();
        assert!(builder.build(&[]).matrix.is_empty());
        let single = builder.build(&[(51.0, 13.0)]);
        assert_eq!(single.matrix.len(), 1);
        assert_eq!(single.matrix.duration_s(0, 0), 0.0);
    }

    #[test]
    fn test_empty_manager_falls_back_to_local() {
        let manager = BackendManager::new(Arc::new(RoutingMetrics::default()));
        let builder = DistanceMatrixBuilder::new(Arc::new(manager), HaversineProvider::default());
        let build = builder.build(&[(51.01, 13.70), (51.05, 13.73)]);
        assert_eq!(build.backend_used, BackendKind::LocalHaversine);
        assert!(build.matrix.duration_s(0, 1) > 0.0);
    }
}
