//! The `compute` job: join precomputed walking distances, scan, persist.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use wayfarer_core::{Location, RouteId, StopId, Timestamp};
use wayfarer_graph::StopDistances;
use wayfarer_queue::{ActiveJob, ChildValue, JobContract};

use super::{ComputeFpJob, ComputeFpOtaJob, ComputeJob, ComputeInput, JobContext, WorkerArena, SOURCE_ALIAS, TARGET_ALIAS};
use crate::engine::{Endpoint, RouteQuery, RouteRun};
use crate::error::ComputeError;
use crate::raptor::{Journey, JourneyStep, RunSettings};

/// Persisted outcome of a `compute` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDocument {
    pub from: Location,
    pub to: Location,
    pub departure_time: Timestamp,
    /// Fastest journey first, then the shortest one.
    pub journeys: Vec<Vec<ResultStep>>,
    pub settings: RunSettings,
}

/// Journey step with stops resolved back to request locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultStep {
    Departure {
        at: Location,
        time: Timestamp,
    },
    Foot {
        from: Location,
        to: Location,
        length: f64,
        time: Timestamp,
    },
    Vehicle {
        boarded_at: Location,
        alighted_at: Location,
        route: RouteId,
        trip_index: usize,
        time: Timestamp,
    },
}

/// Results of the children of a `compute` job.
#[derive(Debug, Default)]
struct Precomputed {
    source: Option<StopDistances>,
    target: Option<StopDistances>,
    direct_walk: Option<f64>,
}

impl Precomputed {
    fn collect(children: &[ChildValue]) -> Result<Self, ComputeError> {
        let mut out = Self::default();
        for child in children {
            if let Some(distances) = child.decode::<ComputeFpOtaJob>() {
                let distances = distances?;
                match distances.alias.as_deref() {
                    Some(SOURCE_ALIAS) => out.source = Some(distances),
                    Some(TARGET_ALIAS) => out.target = Some(distances),
                    other => debug!(alias = ?other, "ignoring unaliased one-to-all result"),
                }
            } else if let Some(path) = child.decode::<ComputeFpJob>() {
                // Best effort: an unreadable path just means no direct walk
                out.direct_walk = path.ok().map(|p| p.distance).filter(|d| d.is_finite());
            }
        }
        Ok(out)
    }
}

fn endpoint(location: &Location, distances: Option<StopDistances>, alias: &str) -> Result<Endpoint, ComputeError> {
    match location {
        Location::Stop { id, .. } => Ok(Endpoint::Stop(*id)),
        Location::Address { coords, .. } => {
            let distances = distances.ok_or_else(|| {
                ComputeError::MissingPrecomputation(format!("one-to-all distances \"{}\" for {}", alias, location))
            })?;
            Ok(Endpoint::Point { coords: *coords, distances: distances.distances })
        }
    }
}

pub async fn process(
    job: &ActiveJob,
    arena: &mut WorkerArena,
    ctx: &JobContext,
) -> Result<serde_json::Value, ComputeError> {
    let input = job.input::<ComputeJob>()?;
    let children = ctx.queue.children_values(job.id).await?;
    let pre = Precomputed::collect(&children)?;

    let settings = input.settings.apply(RunSettings::from(&ctx.routing));
    let query = RouteQuery {
        source: endpoint(&input.from, pre.source, SOURCE_ALIAS)?,
        target: endpoint(&input.to, pre.target, TARGET_ALIAS)?,
        departure: input.departure_time,
        settings,
        direct_walk: pre.direct_walk,
    };

    let run = arena.route.run(&query)?;
    let document = ResultDocument::new(&input, &run, settings);
    let id = ctx.results.save_result(serde_json::to_value(&document)?).await?;

    info!(
        job = %job.id,
        result = %id,
        from = %input.from,
        to = %input.to,
        fastest_arrival = run.selection.fastest.arrival(),
        "journey computed"
    );
    Ok(ComputeJob::encode_output(&id)?)
}

impl ResultDocument {
    pub fn new(input: &ComputeInput, run: &RouteRun, settings: RunSettings) -> Self {
        let journeys = run
            .selection
            .journeys()
            .into_iter()
            .map(|journey| resolve_journey(journey, input, run))
            .collect();

        Self {
            from: input.from,
            to: input.to,
            departure_time: input.departure_time,
            journeys,
            settings,
        }
    }
}

fn resolve_journey(journey: &Journey, input: &ComputeInput, run: &RouteRun) -> Vec<ResultStep> {
    let locate = |id: StopId| -> Location {
        if id == run.source {
            return input.from;
        }
        if id == run.target {
            return input.to;
        }
        let coords = run.data.stop(id).map(|s| s.coords).unwrap_or_default();
        Location::Stop { id, coords }
    };

    journey
        .steps
        .iter()
        .map(|step| match *step {
            JourneyStep::Departure { at, time } => ResultStep::Departure { at: locate(at), time },
            JourneyStep::Foot { from, to, length, time } => ResultStep::Foot {
                from: locate(from),
                to: locate(to),
                length,
                time,
            },
            JourneyStep::Vehicle { boarded_at, alighted_at, route, trip_index, time } => ResultStep::Vehicle {
                boarded_at: locate(boarded_at),
                alighted_at: locate(alighted_at),
                route,
                trip_index,
                time,
            },
        })
        .collect()
}
