//! compute-worker: journey computation worker pool.
//!
//! Loads the network into the in-memory store, starts one worker per core
//! against the in-process broker and keeps the workers' data in sync with
//! the store until interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use wayfarer_compute::jobs::{ComputeNsrJob, JobContext, NsrInput};
use wayfarer_compute::{DataKind, JobOrchestrator, PoolOptions, WorkerPool};
use wayfarer_core::config::{load_dotenv, Config};
use wayfarer_core::{Dataset, MemoryStore};
use wayfarer_queue::{BrokerSettings, JobQueue, MemoryQueue, QueueEvent};

// ── CLI ─────────────────────────────────────────────────────────────

/// Journey compute worker pool.
#[derive(Parser, Debug)]
#[command(name = "compute-worker", version, about)]
struct Cli {
    /// JSON dataset loaded into the store (overrides WAYFARER_DATASET).
    #[arg(long)]
    dataset: Option<PathBuf>,

    /// Worker count, 0 = one per core (overrides WAYFARER_WORKERS).
    #[arg(long)]
    workers: Option<usize>,

    /// Seconds between data freshness checks.
    #[arg(long, env = "WAYFARER_REFRESH_INTERVAL", default_value_t = 60)]
    refresh_interval: u64,

    /// Recompute stop-to-stop walking routes once the pool is up.
    #[arg(long, env = "WAYFARER_NSR_ON_START", default_value_t = false)]
    nsr_on_start: bool,

    /// Shutdown timeout in seconds.
    #[arg(long, env = "WAYFARER_SHUTDOWN_TIMEOUT", default_value_t = 30)]
    shutdown_timeout: u64,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(path) = cli.dataset {
        config.dataset = Some(path);
    }
    if let Some(workers) = cli.workers {
        config.pool.workers = workers;
    }
    config.log_summary();

    let store = match &config.dataset {
        Some(path) => {
            let dataset = Dataset::from_file(path)?;
            info!(
                path = %path.display(),
                stops = dataset.stops.len(),
                routes = dataset.scheduled_routes.len(),
                sections = dataset.sections.len(),
                "dataset loaded"
            );
            Arc::new(MemoryStore::from_dataset(dataset))
        }
        None => {
            warn!("no dataset configured, starting with an empty network");
            Arc::new(MemoryStore::new())
        }
    };

    let broker = BrokerSettings::from_section(&config.queue);
    let queue = Arc::new(MemoryQueue::new(broker.clone()));
    let stall_checker = queue.spawn_stall_checker();
    let event_log = spawn_event_log(queue.as_ref());

    let ctx = JobContext {
        queue: queue.clone(),
        store: store.clone(),
        results: store.clone(),
        broker,
        graph: config.graph.clone(),
        routing: config.routing.clone(),
    };

    info!("compute-worker starting");
    let pool = Arc::new(WorkerPool::start(ctx, PoolOptions::from(&config.pool)).await?);

    if cli.nsr_on_start {
        let orchestrator = JobOrchestrator::new(queue.clone());
        let node = orchestrator.submit_non_scheduled_routes(NsrInput::default()).await?;
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            match orchestrator.output_of::<ComputeNsrJob>(node.id, Duration::from_secs(3600)).await {
                Ok(summary) => {
                    info!(routes = summary.routes, "walking routes recomputed");
                    if let Err(e) = pool.refresh_data(&[DataKind::Route]).await {
                        error!(error = %e, "route data refresh failed");
                    }
                }
                Err(e) => error!(error = %e, "walking route recomputation failed"),
            }
        });
    }

    let refresher = {
        let pool = Arc::clone(&pool);
        let period = Duration::from_secs(cli.refresh_interval.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // First tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = pool.refresh_data(&DataKind::ALL).await {
                    warn!(error = %e, "data refresh failed");
                }
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    refresher.abort();
    event_log.abort();

    let stopped = tokio::time::timeout(Duration::from_secs(cli.shutdown_timeout), pool.shutdown()).await;
    match stopped {
        Ok(n) => info!(workers = n, "workers stopped"),
        Err(_) => warn!("workers did not stop in time"),
    }
    queue.close();
    let _ = stall_checker.await;

    info!("compute-worker exited cleanly");
    Ok(())
}

/// Log broker lifecycle events per job.
fn spawn_event_log(queue: &dyn JobQueue) -> tokio::task::JoinHandle<()> {
    let mut events = queue.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(QueueEvent::Stalled { id, kind }) => warn!(job = %id, %kind, "job stalled"),
                Ok(QueueEvent::Failed { id, kind, reason }) => debug!(job = %id, %kind, %reason, "job failed"),
                Ok(QueueEvent::Active { id, kind, worker }) => debug!(job = %id, %kind, %worker, "job active"),
                Ok(event) => debug!(job = %event.id(), kind = %event.kind(), ?event, "queue event"),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "queue event log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}
