//! Walking jobs: one-to-one paths and one-to-all stop distances.

use tracing::debug;
use wayfarer_queue::{ActiveJob, JobContract};

use super::{ComputeFpJob, ComputeFpOtaJob, JobContext, WorkerArena};
use crate::error::ComputeError;

pub fn process_path(job: &ActiveJob, arena: &mut WorkerArena) -> Result<serde_json::Value, ComputeError> {
    let input = job.input::<ComputeFpJob>()?;
    let path = arena.foot.shortest_path(input.from, input.to)?;
    debug!(job = %job.id, distance = path.distance, nodes = path.path.len(), "foot path computed");
    Ok(ComputeFpJob::encode_output(&path)?)
}

pub fn process_one_to_all(
    job: &ActiveJob,
    arena: &mut WorkerArena,
    ctx: &JobContext,
) -> Result<serde_json::Value, ComputeError> {
    let input = job.input::<ComputeFpOtaJob>()?;
    let max_dist = input.options.max_dist.unwrap_or(ctx.graph.ota_max_dist);
    let graph = if input.options.target_ptn { &mut arena.ptn } else { &mut arena.foot };

    let distances = graph.one_to_all(input.from, max_dist, input.alias)?;
    debug!(
        job = %job.id,
        alias = distances.alias.as_deref().unwrap_or("-"),
        stops = distances.distances.len(),
        max_dist,
        "one-to-all distances computed"
    );
    Ok(ComputeFpOtaJob::encode_output(&distances)?)
}
