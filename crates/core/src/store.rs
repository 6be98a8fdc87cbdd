//! Persistence collaborator boundary.
//!
//! The compute core only reads projections of the source collections and
//! writes two kinds of documents: the derived non-scheduled routes and one
//! result document per journey computation.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::entity::{
    now_ms, NonScheduledRoute, ResultId, ScheduledRouteRecord, Section, StopRecord, Timestamp,
};
use crate::error::StoreError;

/// Read-only projections of the network plus the derived walking routes.
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn stops(&self) -> Result<Vec<StopRecord>, StoreError>;
    async fn scheduled_routes(&self) -> Result<Vec<ScheduledRouteRecord>, StoreError>;
    async fn sections(&self) -> Result<Vec<Section>, StoreError>;
    async fn non_scheduled_routes(&self) -> Result<Vec<NonScheduledRoute>, StoreError>;

    /// Latest `updated_at` across stops and scheduled routes.
    async fn route_data_updated_at(&self) -> Result<Timestamp, StoreError>;

    /// Latest `updated_at` across sections and stops.
    async fn foot_data_updated_at(&self) -> Result<Timestamp, StoreError>;

    /// Time of the last non-scheduled route replacement.
    async fn non_scheduled_routes_updated_at(&self) -> Result<Timestamp, StoreError>;

    /// Replace the whole derived walking-route collection.
    async fn replace_non_scheduled_routes(
        &self,
        routes: Vec<NonScheduledRoute>,
    ) -> Result<usize, StoreError>;
}

/// Sink for computed journey documents.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save_result(&self, document: serde_json::Value) -> Result<ResultId, StoreError>;
    async fn get_result(&self, id: ResultId) -> Result<serde_json::Value, StoreError>;
}

// ── Dataset ───────────────────────────────────────────────────

/// Serialized snapshot of the source collections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub stops: Vec<StopRecord>,
    #[serde(default)]
    pub scheduled_routes: Vec<ScheduledRouteRecord>,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub non_scheduled_routes: Vec<NonScheduledRoute>,
}

impl Dataset {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

// ── In-memory store ───────────────────────────────────────────

#[derive(Default)]
struct Inner {
    dataset: Dataset,
    nsr_updated_at: Timestamp,
    results: HashMap<ResultId, serde_json::Value>,
}

impl Inner {
    fn max_updated_at(&self) -> Timestamp {
        let stops = self.dataset.stops.iter().map(|s| s.updated_at);
        let routes = self.dataset.scheduled_routes.iter().map(|r| r.updated_at);
        let sections = self.dataset.sections.iter().map(|s| s.updated_at);
        stops.chain(routes).chain(sections).max().unwrap_or(0)
    }

    /// Strictly greater than every timestamp seen so far.
    fn next_stamp(&self) -> Timestamp {
        now_ms().max(self.max_updated_at() + 1)
    }
}

/// Store backed by process memory, used by the worker binary and tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_dataset(dataset: Dataset) -> Self {
        Self {
            inner: RwLock::new(Inner {
                dataset,
                ..Default::default()
            }),
        }
    }

    pub async fn upsert_stop(&self, mut stop: StopRecord) {
        let mut inner = self.inner.write().await;
        stop.updated_at = inner.next_stamp();
        let stops = &mut inner.dataset.stops;
        match stops.iter_mut().find(|s| s.id == stop.id) {
            Some(existing) => *existing = stop,
            None => stops.push(stop),
        }
    }

    pub async fn upsert_scheduled_route(&self, mut route: ScheduledRouteRecord) {
        let mut inner = self.inner.write().await;
        route.updated_at = inner.next_stamp();
        let routes = &mut inner.dataset.scheduled_routes;
        match routes.iter_mut().find(|r| r.id == route.id) {
            Some(existing) => *existing = route,
            None => routes.push(route),
        }
    }

    pub async fn upsert_section(&self, mut section: Section) {
        let mut inner = self.inner.write().await;
        section.updated_at = inner.next_stamp();
        let sections = &mut inner.dataset.sections;
        match sections.iter_mut().find(|s| s.id == section.id) {
            Some(existing) => *existing = section,
            None => sections.push(section),
        }
    }

    pub async fn result_count(&self) -> usize {
        self.inner.read().await.results.len()
    }
}

#[async_trait]
impl SourceStore for MemoryStore {
    async fn stops(&self) -> Result<Vec<StopRecord>, StoreError> {
        Ok(self.inner.read().await.dataset.stops.clone())
    }

    async fn scheduled_routes(&self) -> Result<Vec<ScheduledRouteRecord>, StoreError> {
        Ok(self.inner.read().await.dataset.scheduled_routes.clone())
    }

    async fn sections(&self) -> Result<Vec<Section>, StoreError> {
        Ok(self.inner.read().await.dataset.sections.clone())
    }

    async fn non_scheduled_routes(&self) -> Result<Vec<NonScheduledRoute>, StoreError> {
        Ok(self.inner.read().await.dataset.non_scheduled_routes.clone())
    }

    async fn route_data_updated_at(&self) -> Result<Timestamp, StoreError> {
        let inner = self.inner.read().await;
        let stops = inner.dataset.stops.iter().map(|s| s.updated_at);
        let routes = inner.dataset.scheduled_routes.iter().map(|r| r.updated_at);
        Ok(stops
            .chain(routes)
            .max()
            .unwrap_or(0)
            .max(inner.nsr_updated_at))
    }

    async fn foot_data_updated_at(&self) -> Result<Timestamp, StoreError> {
        let inner = self.inner.read().await;
        let stops = inner.dataset.stops.iter().map(|s| s.updated_at);
        let sections = inner.dataset.sections.iter().map(|s| s.updated_at);
        Ok(stops.chain(sections).max().unwrap_or(0))
    }

    async fn non_scheduled_routes_updated_at(&self) -> Result<Timestamp, StoreError> {
        Ok(self.inner.read().await.nsr_updated_at)
    }

    async fn replace_non_scheduled_routes(
        &self,
        routes: Vec<NonScheduledRoute>,
    ) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let count = routes.len();
        inner.nsr_updated_at = inner.next_stamp().max(inner.nsr_updated_at + 1);
        inner.dataset.non_scheduled_routes = routes;
        tracing::debug!(count, "non-scheduled routes replaced");
        Ok(count)
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn save_result(&self, document: serde_json::Value) -> Result<ResultId, StoreError> {
        let id = Uuid::new_v4();
        self.inner.write().await.results.insert(id, document);
        Ok(id)
    }

    async fn get_result(&self, id: ResultId) -> Result<serde_json::Value, StoreError> {
        self.inner
            .read()
            .await
            .results
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}
