use thiserror::Error;
use wayfarer_core::{StopId, StoreError};
use wayfarer_graph::GraphError;
use wayfarer_queue::QueueError;

/// Errors raised while running compute jobs or managing workers.
#[derive(Error, Debug)]
pub enum ComputeError {
    /// A child result the parent job depends on is absent.
    #[error("Missing precomputation: {0}")]
    MissingPrecomputation(String),

    #[error("Unapproachable point: {0}")]
    UnapproachablePoint(String),

    #[error("No journey found")]
    NoJourneyFound,

    #[error("Job stalled: {0}")]
    StalledJob(String),

    #[error("Worker startup failed: {0}")]
    StartupFailure(String),

    #[error("Unknown stop: {0}")]
    UnknownStop(StopId),

    #[error("Job {id} failed: {reason}")]
    JobFailed { id: String, reason: String },

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Graph error: {0}")]
    Graph(GraphError),

    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

impl From<GraphError> for ComputeError {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::UnapproachablePoint { .. } => ComputeError::UnapproachablePoint(e.to_string()),
            other => ComputeError::Graph(other),
        }
    }
}

impl From<tokio::task::JoinError> for ComputeError {
    fn from(e: tokio::task::JoinError) -> Self {
        ComputeError::Task(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayfarer_core::Coords;

    #[test]
    fn unapproachable_graph_error_keeps_its_kind() {
        let err: ComputeError = GraphError::UnapproachablePoint {
            coords: Coords::new(1.0, 2.0),
            max_dist: 10.0,
        }
        .into();
        assert!(matches!(err, ComputeError::UnapproachablePoint(_)));

        let err: ComputeError = GraphError::UnknownSection(4).into();
        assert!(matches!(err, ComputeError::Graph(_)));
    }
}
