//! Background assembly of the data the workers run against.
//!
//! Source collections are read through the store, then the CPU-heavy part
//! runs on the blocking pool so the scheduling runtime keeps serving.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use rayon::prelude::*;
use tracing::info;
use wayfarer_core::config::GraphSection;
use wayfarer_core::{FootNode, NonScheduledRoute, Section, SourceStore, StopId, StopRecord, Timestamp};
use wayfarer_graph::{DijkstraOptions, FootGraphEngine};

use crate::cache::CacheSource;
use crate::error::ComputeError;
use crate::raptor::SharedRouteData;

/// Walking graphs handed to every worker.
#[derive(Debug, Clone)]
pub struct FootData {
    /// Sections only.
    pub foot: FootGraphEngine,
    /// Sections with every approachable stop attached.
    pub ptn: FootGraphEngine,
}

impl FootData {
    pub fn build(sections: Vec<Section>, stops: &[StopRecord], graph: &GraphSection) -> Self {
        let started = Instant::now();
        let mut foot = FootGraphEngine::new(sections, graph.approach_max_dist);
        let bridged = if graph.connect_max_dist > 0.0 {
            foot.connect_components(graph.connect_max_dist)
        } else {
            0
        };

        let mut ptn = foot.clone();
        let attached = ptn.attach_stops(stops);

        info!(
            nodes = foot.graph().node_count(),
            edges = foot.graph().edge_count(),
            bridged,
            stops = stops.len(),
            attached,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "foot data built"
        );
        Self { foot, ptn }
    }
}

pub async fn load_route_data(store: &dyn SourceStore) -> Result<SharedRouteData, ComputeError> {
    let stops = store.stops().await?;
    let routes = store.scheduled_routes().await?;
    let non_scheduled = store.non_scheduled_routes().await?;

    let data = tokio::task::spawn_blocking(move || {
        let started = Instant::now();
        let data = SharedRouteData::new(stops, routes, non_scheduled);
        info!(
            stops = data.stop_count(),
            routes = data.route_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "route data built"
        );
        data
    })
    .await?;
    Ok(data)
}

pub async fn load_foot_data(store: &dyn SourceStore, graph: &GraphSection) -> Result<FootData, ComputeError> {
    let sections = store.sections().await?;
    let stops = store.stops().await?;
    let graph = graph.clone();

    let data = tokio::task::spawn_blocking(move || FootData::build(sections, &stops, &graph)).await?;
    Ok(data)
}

/// Bounded walking routes between every pair of attached stops.
///
/// One Dijkstra per stop, spread over the rayon pool.
pub fn non_scheduled_routes(
    ptn: &FootGraphEngine,
    stops: &[StopId],
    max_dist: f64,
    full_paths: bool,
) -> Vec<NonScheduledRoute> {
    let graph = ptn.graph();
    stops
        .par_iter()
        .filter(|id| graph.contains_node(FootNode::Stop(**id)))
        .flat_map_iter(|&from| {
            let options = DijkstraOptions {
                targets: None,
                max_cumulative_weight: Some(max_dist),
            };
            let reached = graph.dijkstra(&[FootNode::Stop(from)], &options);
            let mut routes: Vec<NonScheduledRoute> = reached
                .distances
                .iter()
                .filter_map(|(node, distance)| {
                    let to = node.stop_id().filter(|to| *to != from)?;
                    Some(NonScheduledRoute {
                        from,
                        to,
                        distance: *distance,
                        path: full_paths.then(|| reached.trace_path(*node)),
                    })
                })
                .collect();
            routes.sort_by_key(|r| r.to);
            routes
        })
        .collect()
}

// ── Cache sources ─────────────────────────────────────────────

/// Route snapshot, stale once stops, routes or walking routes change.
pub struct RouteDataSource {
    pub store: Arc<dyn SourceStore>,
}

#[async_trait]
impl CacheSource for RouteDataSource {
    type Data = SharedRouteData;

    async fn freshness(&self) -> Result<Timestamp, ComputeError> {
        Ok(self.store.route_data_updated_at().await?)
    }

    async fn rebuild(&self) -> Result<SharedRouteData, ComputeError> {
        load_route_data(self.store.as_ref()).await
    }
}

/// Walking graphs, stale once sections or stops change.
pub struct FootDataSource {
    pub store: Arc<dyn SourceStore>,
    pub graph: GraphSection,
}

#[async_trait]
impl CacheSource for FootDataSource {
    type Data = FootData;

    async fn freshness(&self) -> Result<Timestamp, ComputeError> {
        Ok(self.store.foot_data_updated_at().await?)
    }

    async fn rebuild(&self) -> Result<FootData, ComputeError> {
        load_foot_data(self.store.as_ref(), &self.graph).await
    }
}
