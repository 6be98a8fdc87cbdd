use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::job::JobKind;

/// Broker operational metrics, per job kind.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueMetrics {
    pub completed: HashMap<JobKind, u64>,
    pub failed: HashMap<JobKind, u64>,
    pub stalled: HashMap<JobKind, u64>,
    /// Concurrency slots taken: active jobs plus stalled holders that have
    /// not reported in yet.
    pub active: HashMap<JobKind, usize>,
    /// Highest number of simultaneously active jobs observed.
    pub peak_active: HashMap<JobKind, usize>,
    /// Average processing duration of completed jobs.
    pub avg_duration: HashMap<JobKind, Duration>,
    pub last_finished: HashMap<JobKind, DateTime<Utc>>,
}

impl QueueMetrics {
    pub fn record_active(&mut self, kind: JobKind) {
        let active = self.active.entry(kind).or_default();
        *active += 1;
        let now = *active;
        let peak = self.peak_active.entry(kind).or_default();
        *peak = (*peak).max(now);
    }

    pub fn record_inactive(&mut self, kind: JobKind) {
        if let Some(active) = self.active.get_mut(&kind) {
            *active = active.saturating_sub(1);
        }
    }

    pub fn active_count(&self, kind: JobKind) -> usize {
        self.active.get(&kind).copied().unwrap_or(0)
    }

    /// Record a completed job.
    pub fn record_completion(&mut self, kind: JobKind, duration: Duration) {
        *self.completed.entry(kind).or_default() += 1;
        self.last_finished.insert(kind, Utc::now());

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let count = self.completed[&kind];
        let prev_avg = self.avg_duration.get(&kind).copied().unwrap_or_default();
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
        self.avg_duration.insert(kind, new_avg);
    }

    pub fn record_failure(&mut self, kind: JobKind) {
        *self.failed.entry(kind).or_default() += 1;
        self.last_finished.insert(kind, Utc::now());
    }

    pub fn record_stall(&mut self, kind: JobKind) {
        *self.stalled.entry(kind).or_default() += 1;
    }
}
