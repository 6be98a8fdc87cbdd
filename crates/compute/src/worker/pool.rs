use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::{Mutex as StdMutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use wayfarer_core::config::PoolSection;

use super::message::{DataKind, DataPayload, WorkerCommand, WorkerEvent};
use super::runner::{self, WorkerSpec};
use crate::cache::{CacheRead, StalenessCache};
use crate::error::ComputeError;
use crate::jobs::JobContext;
use crate::precompute::{FootDataSource, RouteDataSource};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolOptions {
    /// Number of worker threads.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Longest idle wait for a job before a worker checks its commands.
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
    /// Longest wait for every worker to answer a command.
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

fn default_poll_ms() -> u64 {
    500
}

fn default_ack_timeout_secs() -> u64 {
    30 * 60
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_ms: default_poll_ms(),
            ack_timeout_secs: default_ack_timeout_secs(),
        }
    }
}

impl From<&PoolSection> for PoolOptions {
    fn from(section: &PoolSection) -> Self {
        Self {
            workers: section.effective_workers(),
            ..Self::default()
        }
    }
}

/// What a refresh pushed to the workers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: Vec<DataKind>,
    /// Workers that acknowledged the new data.
    pub acked: usize,
}

struct WorkerSlot {
    index: usize,
    commands: mpsc::UnboundedSender<WorkerCommand>,
    thread: StdMutex<Option<JoinHandle<()>>>,
    live: AtomicBool,
}

/// Fixed set of worker threads sharing one broker.
///
/// The pool owns the precomputed data caches; workers receive the data by
/// message and keep private engines built from it.
pub struct WorkerPool {
    workers: Vec<WorkerSlot>,
    events: Mutex<mpsc::UnboundedReceiver<WorkerEvent>>,
    route_cache: StalenessCache<RouteDataSource>,
    foot_cache: StalenessCache<FootDataSource>,
    /// Serializes refreshes.
    refresh: Mutex<()>,
    /// Sequence number of the latest data push; 0 is the initial data.
    data_seq: AtomicU64,
    ack_timeout: Duration,
}

impl WorkerPool {
    /// Build the initial data, spawn the workers and wait until each one
    /// started or failed to. Fails only if no worker started.
    pub async fn start(ctx: JobContext, options: PoolOptions) -> Result<Self, ComputeError> {
        let route_cache = StalenessCache::new(RouteDataSource { store: ctx.store.clone() });
        let foot_cache = StalenessCache::new(FootDataSource {
            store: ctx.store.clone(),
            graph: ctx.graph.clone(),
        });
        let (route, foot) = tokio::try_join!(route_cache.get(), foot_cache.get())?;
        let payload = DataPayload { route: Some(route.data), foot: Some(foot.data) };

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut workers = Vec::with_capacity(options.workers);
        for index in 0..options.workers {
            let (commands, command_rx) = mpsc::unbounded_channel();
            let spec = WorkerSpec {
                index,
                ctx: ctx.clone(),
                commands: command_rx,
                events: event_tx.clone(),
                poll: Duration::from_millis(options.poll_ms.max(1)),
            };
            info!(worker = index, "starting worker");
            let thread = match runner::spawn(spec) {
                Ok(thread) => thread,
                Err(e) => {
                    error!(worker = index, error = %ComputeError::StartupFailure(e.to_string()), "worker thread not spawned");
                    continue;
                }
            };
            let _ = commands.send(WorkerCommand::Data { seq: 0, payload: payload.clone() });
            workers.push(WorkerSlot {
                index,
                commands,
                thread: StdMutex::new(Some(thread)),
                live: AtomicBool::new(true),
            });
        }
        drop(event_tx);

        let pool = Self {
            workers,
            events: Mutex::new(event_rx),
            route_cache,
            foot_cache,
            refresh: Mutex::new(()),
            data_seq: AtomicU64::new(0),
            ack_timeout: Duration::from_secs(options.ack_timeout_secs),
        };

        let started = pool.collect("started", None).await;
        if started == 0 {
            return Err(ComputeError::StartupFailure("no worker started".into()));
        }
        info!(started, requested = options.workers, "all workers started");
        Ok(pool)
    }

    pub fn live_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.live.load(Ordering::SeqCst)).count()
    }

    /// Rebuild the requested data if its source changed and push it to every
    /// worker, resolving once all of them acknowledged.
    ///
    /// A failed rebuild does not hold back the other kind: whatever was
    /// rebuilt is pushed first, then the first error is returned. The failed
    /// kind stays stale and is retried by the next refresh.
    pub async fn refresh_data(&self, which: &[DataKind]) -> Result<RefreshReport, ComputeError> {
        let _guard = self.refresh.lock().await;
        let mut update = DataPayload::default();
        let mut refreshed = Vec::new();
        let mut failure = None;

        if which.contains(&DataKind::Route) {
            let read = self.route_cache.get().await;
            update.route = take_rebuilt(DataKind::Route, read, &mut refreshed, &mut failure);
        }
        if which.contains(&DataKind::Foot) {
            let read = self.foot_cache.get().await;
            update.foot = take_rebuilt(DataKind::Foot, read, &mut refreshed, &mut failure);
        }

        if update.is_empty() {
            return match failure {
                Some(e) => Err(e),
                None => {
                    debug!(?which, "data up to date, nothing pushed");
                    Ok(RefreshReport::default())
                }
            };
        }

        let seq = self.data_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.broadcast(WorkerCommand::Data { seq, payload: update });
        let acked = self.collect("dataAck", Some(seq)).await;
        info!(?refreshed, acked, seq, "all workers got their data refreshed");

        match failure {
            Some(e) => Err(e),
            None => Ok(RefreshReport { refreshed, acked }),
        }
    }

    /// Ask every worker to stop after its current job and wait for them.
    pub async fn shutdown(&self) -> usize {
        info!("gracefully stopping workers");
        self.broadcast(WorkerCommand::Stop);
        let stopped = self.collect("stopped", None).await;

        let threads: Vec<JoinHandle<()>> = self
            .workers
            .iter()
            .filter_map(|w| w.thread.lock().unwrap_or_else(PoisonError::into_inner).take())
            .collect();
        let joined = tokio::task::spawn_blocking(move || {
            threads.into_iter().map(|t| t.join().is_ok()).filter(|ok| *ok).count()
        })
        .await
        .unwrap_or(0);

        info!(stopped, joined, "workers stopped");
        stopped
    }

    fn broadcast(&self, command: WorkerCommand) {
        for worker in self.workers.iter().filter(|w| w.live.load(Ordering::SeqCst)) {
            if worker.commands.send(command.clone()).is_err() {
                warn!(worker = worker.index, code = command.code(), "worker channel closed");
                worker.live.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Wait until every live worker answered with `code`, and with `seq` when
    /// given. Workers reporting a startup failure or an unexpected stop are
    /// marked dead.
    async fn collect(&self, code: &str, seq: Option<u64>) -> usize {
        let mut events = self.events.lock().await;
        let mut pending: HashSet<usize> = self
            .workers
            .iter()
            .filter(|w| w.live.load(Ordering::SeqCst))
            .map(|w| w.index)
            .collect();
        let deadline = tokio::time::Instant::now() + self.ack_timeout;
        let mut answered = 0;

        while !pending.is_empty() {
            let event = match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(_) => {
                    warn!(code, missing = pending.len(), "timed out waiting for workers");
                    break;
                }
            };

            let worker = event.worker();
            if event.answers(code, seq) {
                if pending.remove(&worker) {
                    answered += 1;
                }
                continue;
            }
            match event {
                WorkerEvent::StartupFailed { reason, .. } => {
                    error!(worker, %reason, "worker failed to start");
                    self.mark_dead(worker);
                    pending.remove(&worker);
                }
                WorkerEvent::Stopped { .. } => {
                    warn!(worker, "worker stopped unexpectedly");
                    self.mark_dead(worker);
                    pending.remove(&worker);
                }
                WorkerEvent::DataAck { seq: late, .. } => {
                    debug!(worker, late, expected = ?seq, "ignoring acknowledgement of an earlier push");
                }
                other => debug!(worker, code = other.code(), "ignoring worker event"),
            }
        }

        if code == "stopped" {
            for worker in &self.workers {
                worker.live.store(false, Ordering::SeqCst);
            }
        }
        answered
    }

    fn mark_dead(&self, index: usize) {
        if let Some(worker) = self.workers.iter().find(|w| w.index == index) {
            worker.live.store(false, Ordering::SeqCst);
        }
    }
}

/// The data of a cache read if it rebuilt, recording the kind as refreshed.
/// A failed read is logged and kept as the refresh's error.
fn take_rebuilt<D>(
    kind: DataKind,
    read: Result<CacheRead<D>, ComputeError>,
    refreshed: &mut Vec<DataKind>,
    failure: &mut Option<ComputeError>,
) -> Option<Arc<D>> {
    match read {
        Ok(read) if read.updated => {
            refreshed.push(kind);
            Some(read.data)
        }
        Ok(_) => None,
        Err(e) => {
            warn!(%kind, error = %e, "data rebuild failed");
            failure.get_or_insert(e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayfarer_core::config::GraphSection;
    use wayfarer_core::{MemoryStore, SourceStore};

    /// One worker slot wired to channels the test holds, with no thread behind it.
    fn detached_pool(
        ack_timeout: Duration,
    ) -> (WorkerPool, mpsc::UnboundedSender<WorkerEvent>, mpsc::UnboundedReceiver<WorkerCommand>) {
        let store: Arc<dyn SourceStore> = Arc::new(MemoryStore::new());
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let pool = WorkerPool {
            workers: vec![WorkerSlot {
                index: 0,
                commands,
                thread: StdMutex::new(None),
                live: AtomicBool::new(true),
            }],
            events: Mutex::new(event_rx),
            route_cache: StalenessCache::new(RouteDataSource { store: store.clone() }),
            foot_cache: StalenessCache::new(FootDataSource { store, graph: GraphSection::default() }),
            refresh: Mutex::new(()),
            data_seq: AtomicU64::new(0),
            ack_timeout,
        };
        (pool, event_tx, command_rx)
    }

    #[tokio::test(start_paused = true)]
    async fn late_acknowledgement_does_not_answer_a_newer_push() {
        let (pool, events, _commands) = detached_pool(Duration::from_secs(5));

        // Answer to push 1, arriving after that push timed out
        events.send(WorkerEvent::DataAck { worker: 0, seq: 1 }).unwrap();
        assert_eq!(pool.collect("dataAck", Some(2)).await, 0);
        assert_eq!(pool.live_workers(), 1);

        events.send(WorkerEvent::DataAck { worker: 0, seq: 1 }).unwrap();
        events.send(WorkerEvent::DataAck { worker: 0, seq: 2 }).unwrap();
        assert_eq!(pool.collect("dataAck", Some(2)).await, 1);
    }

    #[tokio::test]
    async fn each_refresh_carries_the_next_sequence_number() {
        let (pool, events, mut commands) = detached_pool(Duration::from_secs(5));

        let worker = async {
            match commands.recv().await {
                Some(WorkerCommand::Data { seq, payload }) => {
                    assert!(payload.is_complete());
                    events.send(WorkerEvent::DataAck { worker: 0, seq }).unwrap();
                    seq
                }
                other => panic!("expected data, got {:?}", other.map(|c| c.code())),
            }
        };
        let (report, seq) = tokio::join!(pool.refresh_data(&DataKind::ALL), worker);

        let report = report.unwrap();
        assert_eq!(seq, 1);
        assert_eq!(report.refreshed, vec![DataKind::Route, DataKind::Foot]);
        assert_eq!(report.acked, 1);

        // Nothing changed since
        assert_eq!(pool.refresh_data(&DataKind::ALL).await.unwrap(), RefreshReport::default());
    }
}
