use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wayfarer_core::config::QueueSection;

use crate::job::JobKind;

/// Per-queue broker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Global ceiling on active jobs of this kind. `None` = unbounded.
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// A claimed job whose lock is not renewed within this window is stalled.
    #[serde(default = "default_lock_duration_ms")]
    pub lock_duration_ms: u64,
    /// Stalls tolerated before the job fails.
    #[serde(default = "default_max_stalled_count")]
    pub max_stalled_count: u32,
    /// Finished jobs kept once completed; older ones are dropped with their
    /// return values. A child is kept while its parent is unfinished.
    #[serde(default = "default_keep_completed")]
    pub keep_completed: usize,
    /// Same as `keep_completed`, for failed jobs.
    #[serde(default = "default_keep_failed")]
    pub keep_failed: usize,
}

fn default_lock_duration_ms() -> u64 {
    60_000
}

fn default_max_stalled_count() -> u32 {
    1
}

fn default_keep_completed() -> usize {
    1_000
}

fn default_keep_failed() -> usize {
    5_000
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            concurrency: None,
            lock_duration_ms: default_lock_duration_ms(),
            max_stalled_count: default_max_stalled_count(),
            keep_completed: default_keep_completed(),
            keep_failed: default_keep_failed(),
        }
    }
}

impl QueueSettings {
    pub fn lock_duration(&self) -> Duration {
        Duration::from_millis(self.lock_duration_ms)
    }

    /// How many finished jobs ending in `failed` or completed state to keep.
    pub fn retention(&self, failed: bool) -> usize {
        if failed {
            self.keep_failed
        } else {
            self.keep_completed
        }
    }

    /// Settings of `kind` derived from the queue config section.
    ///
    /// `computeNSR` is serialized globally; `compute` gets the long lock window.
    pub fn for_kind(kind: JobKind, section: &QueueSection) -> Self {
        let lock_secs = match kind {
            JobKind::Compute => section.compute_lock_secs,
            _ => section.default_lock_secs,
        };
        Self {
            concurrency: (kind == JobKind::ComputeNsr).then_some(1),
            lock_duration_ms: lock_secs * 1_000,
            max_stalled_count: section.max_stalled_count,
            keep_completed: section.keep_completed,
            keep_failed: section.keep_failed,
        }
    }
}

/// Broker-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSettings {
    #[serde(default)]
    pub queues: HashMap<JobKind, QueueSettings>,
    /// Period of the stalled-job sweep.
    #[serde(default = "default_stall_check_ms")]
    pub stall_check_ms: u64,
    /// Capacity of the event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_stall_check_ms() -> u64 {
    5_000
}

fn default_event_capacity() -> usize {
    1_024
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self::from_section(&QueueSection::default())
    }
}

impl BrokerSettings {
    pub fn from_section(section: &QueueSection) -> Self {
        Self {
            queues: JobKind::ALL
                .into_iter()
                .map(|kind| (kind, QueueSettings::for_kind(kind, section)))
                .collect(),
            stall_check_ms: section.stall_check_ms,
            event_capacity: default_event_capacity(),
        }
    }

    pub fn queue(&self, kind: JobKind) -> QueueSettings {
        self.queues.get(&kind).cloned().unwrap_or_default()
    }
}
