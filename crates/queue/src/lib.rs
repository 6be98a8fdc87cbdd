//! Job broker: typed job contracts, flows of dependent jobs, and an
//! in-process broker with per-queue concurrency, locks and stall recovery.

pub mod broker;
pub mod error;
pub mod events;
pub mod flow;
pub mod job;
pub mod memory;
pub mod metrics;
pub mod settings;

pub use broker::JobQueue;
pub use error::QueueError;
pub use events::QueueEvent;
pub use flow::{FlowJob, JobNode};
pub use job::{ActiveJob, ChildValue, Job, JobContract, JobId, JobKind, JobOptions, JobOutcome, JobState};
pub use memory::{MemoryQueue, STALLED_REASON};
pub use metrics::QueueMetrics;
pub use settings::{BrokerSettings, QueueSettings};
