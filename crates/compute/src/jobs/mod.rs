//! Job contracts and their processors.
//!
//! Every job kind binds its input and output types through a
//! [`JobContract`]; producers build flows from the same contracts the
//! processors decode, so both sides agree on the payload shape.

pub mod compute;
pub mod foot;
pub mod nsr;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use wayfarer_core::config::{GraphSection, RoutingSection};
use wayfarer_core::{Coords, Location, ResultId, ResultStore, SourceStore, Timestamp};
use wayfarer_graph::{FootGraphEngine, FootPath, StopDistances};
use wayfarer_queue::{ActiveJob, BrokerSettings, JobContract, JobKind, JobQueue};

use crate::engine::RouteComputeEngine;
use crate::error::ComputeError;
use crate::precompute::FootData;
use crate::raptor::{RunSettingsOverride, SharedRouteData};

pub use compute::ResultDocument;
pub use nsr::NsrSummary;

/// Alias of the one-to-all result computed for the journey source.
pub const SOURCE_ALIAS: &str = "ps";
/// Alias of the one-to-all result computed for the journey target.
pub const TARGET_ALIAS: &str = "pt";

// ── Contracts ─────────────────────────────────────────────────

pub struct ComputeJob;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeInput {
    pub from: Location,
    pub to: Location,
    pub departure_time: Timestamp,
    #[serde(default)]
    pub settings: RunSettingsOverride,
}

impl JobContract for ComputeJob {
    const KIND: JobKind = JobKind::Compute;
    type Input = ComputeInput;
    type Output = ResultId;
}

pub struct ComputeFpJob;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FootPathInput {
    pub from: Coords,
    pub to: Coords,
}

impl JobContract for ComputeFpJob {
    const KIND: JobKind = JobKind::ComputeFp;
    type Input = FootPathInput;
    type Output = FootPath;
}

pub struct ComputeFpOtaJob;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OneToAllOptions {
    /// Defaults to the configured one-to-all bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_dist: Option<f64>,
    /// Run on the graph holding network stops.
    #[serde(default)]
    pub target_ptn: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneToAllInput {
    pub from: Coords,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub options: OneToAllOptions,
}

impl JobContract for ComputeFpOtaJob {
    const KIND: JobKind = JobKind::ComputeFpOta;
    type Input = OneToAllInput;
    type Output = StopDistances;
}

pub struct ComputeNsrJob;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NsrInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_dist: Option<f64>,
    #[serde(default)]
    pub get_full_paths: bool,
}

impl JobContract for ComputeNsrJob {
    const KIND: JobKind = JobKind::ComputeNsr;
    type Input = NsrInput;
    type Output = NsrSummary;
}

// ── Worker-local state ────────────────────────────────────────

/// Engines private to one worker. Foot graphs are mutated by request-scoped
/// insertions, so an arena is never shared between workers.
#[derive(Debug)]
pub struct WorkerArena {
    pub route: RouteComputeEngine,
    pub foot: FootGraphEngine,
    pub ptn: FootGraphEngine,
}

impl WorkerArena {
    pub fn new(route: Arc<SharedRouteData>, foot: &FootData) -> Self {
        Self {
            route: RouteComputeEngine::new(route),
            foot: foot.foot.clone(),
            ptn: foot.ptn.clone(),
        }
    }

    pub fn update_route(&self, data: Arc<SharedRouteData>) {
        self.route.update_data(data);
    }

    /// Replace both walking graphs with private copies of `foot`.
    pub fn update_foot(&mut self, foot: &FootData) {
        self.foot = foot.foot.clone();
        self.ptn = foot.ptn.clone();
    }
}

/// Collaborators shared by every worker.
#[derive(Clone)]
pub struct JobContext {
    pub queue: Arc<dyn JobQueue>,
    pub store: Arc<dyn SourceStore>,
    pub results: Arc<dyn ResultStore>,
    pub broker: BrokerSettings,
    pub graph: GraphSection,
    pub routing: RoutingSection,
}

/// Run one claimed job and return its encoded output.
pub async fn process(
    job: &ActiveJob,
    arena: &mut WorkerArena,
    ctx: &JobContext,
) -> Result<serde_json::Value, ComputeError> {
    match job.kind {
        JobKind::Compute => compute::process(job, arena, ctx).await,
        JobKind::ComputeFp => foot::process_path(job, arena),
        JobKind::ComputeFpOta => foot::process_one_to_all(job, arena, ctx),
        JobKind::ComputeNsr => nsr::process(job, ctx).await,
    }
}
