//! Broker trait shared by producers (orchestrator) and consumers (workers).

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::QueueError;
use crate::events::QueueEvent;
use crate::flow::{FlowJob, JobNode};
use crate::job::{ActiveJob, ChildValue, Job, JobId, JobKind, JobOutcome};
use crate::metrics::QueueMetrics;

/// Trait for job broker backends.
///
/// Delivery is at-least-once: a job whose lock expires is handed out again,
/// and completions carrying a stale lock token are rejected.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Submit a job tree atomically.
    async fn add_flow(&self, flow: FlowJob) -> Result<JobNode, QueueError>;

    /// Claim the next runnable job of one of `kinds`, honoring concurrency ceilings.
    ///
    /// Returns `None` when nothing is runnable right now.
    async fn next_job(&self, kinds: &[JobKind], worker: &str) -> Result<Option<ActiveJob>, QueueError>;

    /// Like [`next_job`](Self::next_job), but waits up to `timeout` for a job.
    async fn wait_for_job(
        &self,
        kinds: &[JobKind],
        worker: &str,
        timeout: Duration,
    ) -> Result<Option<ActiveJob>, QueueError>;

    /// Push the lock expiry of an active job forward.
    async fn extend_lock(&self, id: JobId, token: Uuid) -> Result<(), QueueError>;

    async fn complete(&self, id: JobId, token: Uuid, value: serde_json::Value) -> Result<(), QueueError>;

    async fn fail(&self, id: JobId, token: Uuid, reason: String) -> Result<(), QueueError>;

    /// Return values of the completed children of `id`.
    async fn children_values(&self, id: JobId) -> Result<Vec<ChildValue>, QueueError>;

    async fn job(&self, id: JobId) -> Result<Job, QueueError>;

    /// Remove a job that is not currently active, with its descendants.
    async fn remove_job(&self, id: JobId) -> Result<(), QueueError>;

    /// Resolve once the job reached a terminal state.
    async fn wait_until_finished(&self, id: JobId, timeout: Duration) -> Result<JobOutcome, QueueError>;

    fn subscribe(&self) -> broadcast::Receiver<QueueEvent>;

    fn metrics(&self) -> QueueMetrics;

    /// Stop handing out jobs; pending waiters return `None`.
    fn close(&self);
}
