use serde::Serialize;

use crate::job::{JobId, JobKind};

/// Lifecycle notifications broadcast by a broker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    Added { id: JobId, kind: JobKind },
    Active { id: JobId, kind: JobKind, worker: String },
    Completed { id: JobId, kind: JobKind },
    Failed { id: JobId, kind: JobKind, reason: String },
    /// Lock expired; the job went back to waiting.
    Stalled { id: JobId, kind: JobKind },
    Removed { id: JobId, kind: JobKind },
}

impl QueueEvent {
    pub fn id(&self) -> JobId {
        match self {
            QueueEvent::Added { id, .. }
            | QueueEvent::Active { id, .. }
            | QueueEvent::Completed { id, .. }
            | QueueEvent::Failed { id, .. }
            | QueueEvent::Stalled { id, .. }
            | QueueEvent::Removed { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            QueueEvent::Added { kind, .. }
            | QueueEvent::Active { kind, .. }
            | QueueEvent::Completed { kind, .. }
            | QueueEvent::Failed { kind, .. }
            | QueueEvent::Stalled { kind, .. }
            | QueueEvent::Removed { kind, .. } => *kind,
        }
    }
}
