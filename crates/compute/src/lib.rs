//! Journey computation core: staleness-aware data caches, the transit
//! engine, walking jobs, job orchestration and the worker pool.

pub mod cache;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod orchestrator;
pub mod precompute;
pub mod raptor;
pub mod worker;

pub use cache::{CacheRead, CacheSource, StalenessCache};
pub use engine::{Endpoint, RouteComputeEngine, RouteQuery, RouteRun};
pub use error::ComputeError;
pub use jobs::{JobContext, ResultDocument, WorkerArena};
pub use orchestrator::JobOrchestrator;
pub use precompute::FootData;
pub use raptor::{Journey, JourneySelection, JourneyStep, RunSettings, RunSettingsOverride, SharedRouteData};
pub use worker::{DataKind, PoolOptions, RefreshReport, WorkerPool};
