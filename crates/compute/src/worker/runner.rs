//! Body of one worker thread.
//!
//! Each worker owns a current-thread runtime and a private [`WorkerArena`].
//! Jobs run one at a time, so request-scoped graph insertions never overlap
//! within a worker; control commands are handled between jobs.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::thread::JoinHandle;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use wayfarer_queue::{ActiveJob, JobKind, QueueError};

use super::message::{DataPayload, WorkerCommand, WorkerEvent};
use crate::error::ComputeError;
use crate::jobs::{self, JobContext, WorkerArena};

const IDLE_BACKOFF: Duration = Duration::from_millis(10);
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

pub(crate) struct WorkerSpec {
    pub index: usize,
    pub ctx: JobContext,
    pub commands: mpsc::UnboundedReceiver<WorkerCommand>,
    pub events: mpsc::UnboundedSender<WorkerEvent>,
    /// Longest wait for a job before commands are checked again.
    pub poll: Duration,
}

pub(crate) fn spawn(spec: WorkerSpec) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(format!("compute-worker-{}", spec.index))
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build();
            match runtime {
                Ok(runtime) => runtime.block_on(run(spec)),
                Err(e) => {
                    let reason = ComputeError::StartupFailure(e.to_string()).to_string();
                    error!(worker = spec.index, %reason, "worker runtime failed to start");
                    let _ = spec.events.send(WorkerEvent::StartupFailed { worker: spec.index, reason });
                }
            }
        })
}

fn arena_from(payload: &DataPayload) -> Option<WorkerArena> {
    match (&payload.route, &payload.foot) {
        (Some(route), Some(foot)) => Some(WorkerArena::new(route.clone(), foot)),
        _ => None,
    }
}

async fn run(mut spec: WorkerSpec) {
    let worker = spec.index;
    let name = format!("W-{}", worker);
    info!(worker = %name, "starting");

    let mut payload = match spec.commands.recv().await {
        Some(WorkerCommand::Data { payload, .. }) => payload,
        Some(other) => {
            let reason = format!("expected initial data, got {}", other.code());
            error!(worker = %name, %reason, "error during startup");
            let _ = spec.events.send(WorkerEvent::StartupFailed { worker, reason });
            return;
        }
        None => return,
    };
    let Some(mut arena) = arena_from(&payload) else {
        let reason = "initial data is incomplete".to_string();
        error!(worker = %name, %reason, "error during startup");
        let _ = spec.events.send(WorkerEvent::StartupFailed { worker, reason });
        return;
    };

    info!(worker = %name, "started");
    let _ = spec.events.send(WorkerEvent::Started { worker });

    loop {
        tokio::select! {
            biased;

            command = spec.commands.recv() => match command {
                Some(WorkerCommand::Data { seq, payload: update }) => {
                    if let Some(route) = &update.route {
                        arena.update_route(route.clone());
                    }
                    if let Some(foot) = &update.foot {
                        arena.update_foot(foot);
                    }
                    payload = payload.merged(update);
                    info!(worker = %name, seq, "refreshed data");
                    let _ = spec.events.send(WorkerEvent::DataAck { worker, seq });
                }
                Some(WorkerCommand::Stop) | None => break,
            },

            claimed = spec.ctx.queue.wait_for_job(&JobKind::ALL, &name, spec.poll) => match claimed {
                Ok(Some(job)) => {
                    if !run_job(job, &mut arena, &spec.ctx, &name).await {
                        // A panic may have left request-scoped insertions behind
                        if let Some(fresh) = arena_from(&payload) {
                            arena = fresh;
                            warn!(worker = %name, "arena rebuilt after a panicking job");
                        }
                    }
                }
                Ok(None) => tokio::time::sleep(IDLE_BACKOFF).await,
                Err(e) => {
                    warn!(worker = %name, error = %e, "failed to claim a job");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            },
        }
    }

    info!(worker = %name, "gracefully stopped");
    let _ = spec.events.send(WorkerEvent::Stopped { worker });
}

/// Run a claimed job, renewing its lock while it runs, and report the outcome.
///
/// Returns `false` when the job panicked.
async fn run_job(job: ActiveJob, arena: &mut WorkerArena, ctx: &JobContext, worker: &str) -> bool {
    info!(worker, job = %job.id, kind = %job.kind, attempt = job.attempt, "job starting");
    let started = std::time::Instant::now();

    let renew_every = (ctx.broker.queue(job.kind).lock_duration() / 2).max(Duration::from_millis(10));
    let outcome = {
        let work = AssertUnwindSafe(jobs::process(&job, arena, ctx)).catch_unwind();
        tokio::pin!(work);
        let mut renew = tokio::time::interval_at(Instant::now() + renew_every, renew_every);
        loop {
            tokio::select! {
                outcome = &mut work => break outcome,
                _ = renew.tick() => {
                    if let Err(e) = ctx.queue.extend_lock(job.id, job.token).await {
                        warn!(worker, job = %job.id, error = %e, "failed to extend job lock");
                    }
                }
            }
        }
    };

    let (result, intact) = match outcome {
        Ok(result) => (result, true),
        Err(panic) => (Err(ComputeError::Task(panic_message(panic.as_ref()))), false),
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    let reported = match result {
        Ok(value) => {
            info!(worker, job = %job.id, kind = %job.kind, elapsed_ms, "job finished");
            ctx.queue.complete(job.id, job.token, value).await
        }
        Err(e) => {
            error!(worker, job = %job.id, kind = %job.kind, error = %e, elapsed_ms, "job failed");
            ctx.queue.fail(job.id, job.token, e.to_string()).await
        }
    };

    match reported {
        Ok(()) => {}
        Err(QueueError::LockMismatch(id)) => {
            warn!(worker, error = %ComputeError::StalledJob(id.to_string()), "lock lost, outcome discarded");
        }
        Err(e) => warn!(worker, job = %job.id, error = %e, "failed to report job outcome"),
    }
    debug!(worker, job = %job.id, "job released");
    intact
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("job panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("job panicked: {}", s)
    } else {
        "job panicked".to_string()
    }
}
