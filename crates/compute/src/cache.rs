//! Derived data kept in sync with its backing store.
//!
//! A [`StalenessCache`] probes a cheap freshness stamp (typically the latest
//! `updated_at` of the source collections) and rebuilds its value only when
//! the stamp moved past the time of the last rebuild. Rebuilds are
//! single-flight: concurrent readers that detect the same change wait for one
//! rebuild and share its result.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use wayfarer_core::{now_ms, Timestamp};

use crate::error::ComputeError;

/// Backing store of a cached value.
#[async_trait]
pub trait CacheSource: Send + Sync {
    type Data: Send + Sync;

    /// Cheap stamp that increases whenever the source changes.
    async fn freshness(&self) -> Result<Timestamp, ComputeError>;

    async fn rebuild(&self) -> Result<Self::Data, ComputeError>;
}

/// Result of [`StalenessCache::get`].
#[derive(Debug)]
pub struct CacheRead<D> {
    /// A rebuild happened during this call.
    pub updated: bool,
    pub last_update: Timestamp,
    /// Shared with every other reader; never mutated.
    pub data: Arc<D>,
}

impl<D> Clone for CacheRead<D> {
    fn clone(&self) -> Self {
        Self {
            updated: self.updated,
            last_update: self.last_update,
            data: Arc::clone(&self.data),
        }
    }
}

struct Slot<D> {
    data: Option<Arc<D>>,
    last_update: Timestamp,
}

pub struct StalenessCache<S: CacheSource> {
    source: S,
    slot: Mutex<Slot<S::Data>>,
}

impl<S: CacheSource> StalenessCache<S> {
    /// Empty cache; the first `get` always rebuilds.
    pub fn new(source: S) -> Self {
        Self {
            source,
            slot: Mutex::new(Slot { data: None, last_update: -1 }),
        }
    }

    /// Cache seeded with data already built as of `last_update`.
    pub fn with_data(source: S, data: S::Data, last_update: Timestamp) -> Self {
        Self {
            source,
            slot: Mutex::new(Slot { data: Some(Arc::new(data)), last_update }),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Return the cached value, rebuilding it first if the source changed.
    ///
    /// The slot lock is held across probe and rebuild, so callers arriving
    /// during a rebuild observe its result instead of starting another one.
    pub async fn get(&self) -> Result<CacheRead<S::Data>, ComputeError> {
        let mut slot = self.slot.lock().await;
        let probe = self.source.freshness().await?;

        if let Some(data) = &slot.data {
            if probe <= slot.last_update {
                return Ok(CacheRead {
                    updated: false,
                    last_update: slot.last_update,
                    data: Arc::clone(data),
                });
            }
        }

        let started = std::time::Instant::now();
        let data = Arc::new(self.source.rebuild().await?);
        slot.last_update = now_ms().max(probe);
        slot.data = Some(Arc::clone(&data));

        tracing::debug!(
            probe,
            last_update = slot.last_update,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cache rebuilt"
        );

        Ok(CacheRead {
            updated: true,
            last_update: slot.last_update,
            data,
        })
    }

    pub async fn last_update(&self) -> Timestamp {
        self.slot.lock().await.last_update
    }
}
