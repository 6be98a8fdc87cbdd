//! Typed control channel between the pool and its workers.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::precompute::FootData;
use crate::raptor::SharedRouteData;

/// Kinds of precomputed data a worker runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Route,
    Foot,
}

impl DataKind {
    pub const ALL: [DataKind; 2] = [DataKind::Route, DataKind::Foot];
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataKind::Route => f.write_str("route"),
            DataKind::Foot => f.write_str("foot"),
        }
    }
}

/// Data pushed to workers. Absent parts are left as they are.
#[derive(Debug, Clone, Default)]
pub struct DataPayload {
    pub route: Option<Arc<SharedRouteData>>,
    pub foot: Option<Arc<FootData>>,
}

impl DataPayload {
    pub fn is_complete(&self) -> bool {
        self.route.is_some() && self.foot.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.route.is_none() && self.foot.is_none()
    }

    /// `other` with the parts it lacks taken from `self`.
    pub fn merged(&self, other: DataPayload) -> DataPayload {
        DataPayload {
            route: other.route.or_else(|| self.route.clone()),
            foot: other.foot.or_else(|| self.foot.clone()),
        }
    }
}

/// Pool to worker.
#[derive(Debug, Clone)]
pub enum WorkerCommand {
    /// Initial (`seq` 0) or refreshed data, acknowledged with the same `seq`.
    Data { seq: u64, payload: DataPayload },
    /// Finish the current job, then exit.
    Stop,
}

/// Worker to pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Started { worker: usize },
    DataAck { worker: usize, seq: u64 },
    Stopped { worker: usize },
    StartupFailed { worker: usize, reason: String },
}

impl WorkerCommand {
    pub fn code(&self) -> &'static str {
        match self {
            WorkerCommand::Data { .. } => "data",
            WorkerCommand::Stop => "stop",
        }
    }
}

impl WorkerEvent {
    pub fn code(&self) -> &'static str {
        match self {
            WorkerEvent::Started { .. } => "started",
            WorkerEvent::DataAck { .. } => "dataAck",
            WorkerEvent::Stopped { .. } => "stopped",
            WorkerEvent::StartupFailed { .. } => "startupFailed",
        }
    }

    pub fn worker(&self) -> usize {
        match self {
            WorkerEvent::Started { worker }
            | WorkerEvent::DataAck { worker, .. }
            | WorkerEvent::Stopped { worker }
            | WorkerEvent::StartupFailed { worker, .. } => *worker,
        }
    }

    /// Whether this event answers a command awaiting `code`. Acknowledgements
    /// only count for the push they carry the sequence number of.
    pub fn answers(&self, code: &str, seq: Option<u64>) -> bool {
        if self.code() != code {
            return false;
        }
        match (self, seq) {
            (WorkerEvent::DataAck { seq: acked, .. }, Some(expected)) => *acked == expected,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_parts_not_refreshed() {
        let route = Arc::new(SharedRouteData::default());
        let held = DataPayload { route: Some(route.clone()), foot: None };
        let merged = held.merged(DataPayload::default());
        assert!(Arc::ptr_eq(merged.route.as_ref().unwrap(), &route));
        assert!(!merged.is_complete());
        assert!(DataPayload::default().is_empty());
    }

    #[test]
    fn codes() {
        assert_eq!(WorkerCommand::Stop.code(), "stop");
        assert_eq!(WorkerEvent::DataAck { worker: 2, seq: 1 }.code(), "dataAck");
        assert_eq!(WorkerEvent::Stopped { worker: 2 }.worker(), 2);
    }

    #[test]
    fn acknowledgement_counts_only_for_its_own_push() {
        let late = WorkerEvent::DataAck { worker: 0, seq: 1 };
        assert!(!late.answers("dataAck", Some(2)));
        assert!(late.answers("dataAck", Some(1)));
        assert!(!late.answers("stopped", None));
        assert!(WorkerEvent::Started { worker: 0 }.answers("started", None));
    }
}
