//! tour-planner
//!
//! Delivery tour planning for a single depot: travel matrices from a routing
//! service with circuit breaking and a local fallback, stop ordering, tour
//! time estimation, and time-box enforcement by splitting.

pub mod backend;
pub mod circuit_breaker;
pub mod cluster;
pub mod config;
pub mod error;
pub mod estimator;
pub mod haversine;
pub mod matrix;
pub mod matrix_builder;
pub mod metrics;
pub mod model;
pub mod osrm;
pub mod planner;
pub mod polyline;
pub mod rate_limiter;
pub mod sector;
pub mod solver;
pub mod splitter;
pub mod traits;

pub use backend::{BackendKind, BackendManager};
pub use config::PlannerConfig;
pub use error::{ConfigError, PlannerError, ProviderError};
pub use model::{Cluster, Point, Stop, Tour, TourMetrics, Warning};
pub use planner::{OptimizationResult, Partitioning, TourPlanner};
