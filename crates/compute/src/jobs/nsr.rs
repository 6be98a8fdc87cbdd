//! Recomputation of every stop-to-stop walking route.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;
use wayfarer_queue::{ActiveJob, JobContract};

use super::{ComputeNsrJob, JobContext};
use crate::error::ComputeError;
use crate::precompute::{load_foot_data, non_scheduled_routes};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NsrSummary {
    /// Stops used as route origins.
    pub stops: usize,
    /// Routes written to the store.
    pub routes: usize,
}

/// Walking routes are derived from the store as it is now, not from the
/// worker's possibly older walking graph.
pub async fn process(job: &ActiveJob, ctx: &JobContext) -> Result<serde_json::Value, ComputeError> {
    let input = job.input::<ComputeNsrJob>()?;
    let max_dist = input.max_dist.unwrap_or(ctx.graph.nsr_max_dist);
    let started = Instant::now();

    let foot = load_foot_data(ctx.store.as_ref(), &ctx.graph).await?;
    let stops: Vec<_> = ctx.store.stops().await?.into_iter().map(|s| s.id).collect();
    let origins = stops.len();
    let full_paths = input.get_full_paths;
    let routes =
        tokio::task::spawn_blocking(move || non_scheduled_routes(&foot.ptn, &stops, max_dist, full_paths)).await?;
    let written = ctx.store.replace_non_scheduled_routes(routes).await?;

    info!(
        job = %job.id,
        stops = origins,
        routes = written,
        max_dist,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "non-scheduled routes replaced"
    );
    Ok(ComputeNsrJob::encode_output(&NsrSummary { stops: origins, routes: written })?)
}
