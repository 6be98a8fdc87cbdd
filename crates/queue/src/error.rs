//! Queue error types.

use thiserror::Error;

use crate::job::{JobId, JobState};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("lock token mismatch for job {0}")]
    LockMismatch(JobId),

    #[error("job {0} is locked by a worker")]
    Locked(JobId),

    #[error("job {id} is {state}, expected {expected}")]
    InvalidState {
        id: JobId,
        state: JobState,
        expected: JobState,
    },

    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("queue closed")]
    Closed,
}
