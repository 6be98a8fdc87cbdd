use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use tracing::debug;
use wayfarer_core::{Coords, StopId, Timestamp};

use crate::error::ComputeError;
use crate::raptor::{scan, JourneySelection, RouteDataView, RunSettings, SharedRouteData};

/// Journey endpoint as seen by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    /// A stop of the route snapshot.
    Stop(StopId),
    /// An arbitrary point, linked to nearby stops by precomputed walking distances.
    Point {
        coords: Coords,
        distances: HashMap<StopId, f64>,
    },
}

#[derive(Debug, Clone)]
pub struct RouteQuery {
    pub source: Endpoint,
    pub target: Endpoint,
    pub departure: Timestamp,
    pub settings: RunSettings,
    /// Walking distance between two point endpoints, when known.
    pub direct_walk: Option<f64>,
}

/// Outcome of a query, with the snapshot it ran against.
#[derive(Debug, Clone)]
pub struct RouteRun {
    pub selection: JourneySelection,
    /// Stop id used for the source, synthetic for points.
    pub source: StopId,
    pub target: StopId,
    pub data: Arc<SharedRouteData>,
}

/// Journey engine over a hot-swappable route snapshot.
///
/// Queries clone the current `Arc` when they start; a swap replaces the
/// reference and never touches a snapshot a query may still be reading.
#[derive(Debug)]
pub struct RouteComputeEngine {
    data: RwLock<Arc<SharedRouteData>>,
}

impl RouteComputeEngine {
    pub fn new(data: Arc<SharedRouteData>) -> Self {
        Self { data: RwLock::new(data) }
    }

    pub fn snapshot(&self) -> Arc<SharedRouteData> {
        Arc::clone(&self.data.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn update_data(&self, data: Arc<SharedRouteData>) {
        let mut current = self.data.write().unwrap_or_else(PoisonError::into_inner);
        debug!(
            stops = data.stop_count(),
            routes = data.route_count(),
            "route data swapped"
        );
        *current = data;
    }

    pub fn run(&self, query: &RouteQuery) -> Result<RouteRun, ComputeError> {
        let started = Instant::now();
        let data = self.snapshot();
        let mut view = RouteDataView::new(Arc::clone(&data));

        let source = resolve(&mut view, &query.source, data.max_stop_id() + 1)?;
        let target = resolve(&mut view, &query.target, data.max_stop_id() + 2)?;

        if let (Endpoint::Point { .. }, Endpoint::Point { .. }, Some(length)) =
            (&query.source, &query.target, query.direct_walk)
        {
            if length.is_finite() {
                view.add_transfer(source, target, length);
            }
        }

        let journeys = scan(&view, source, target, query.departure, &query.settings);
        debug!(
            source,
            target,
            journeys = journeys.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "scan done"
        );

        let selection = JourneySelection::select(journeys)?;
        Ok(RouteRun { selection, source, target, data })
    }
}

fn resolve(view: &mut RouteDataView, endpoint: &Endpoint, synthetic: StopId) -> Result<StopId, ComputeError> {
    match endpoint {
        Endpoint::Stop(id) if view.contains_stop(*id) => Ok(*id),
        Endpoint::Stop(id) => Err(ComputeError::UnknownStop(*id)),
        Endpoint::Point { coords, distances } => {
            let attached = view.attach_stop(
                synthetic,
                *coords,
                distances.iter().map(|(stop, d)| (*stop, *d)),
            );
            debug!(stop = synthetic, attached, "point attached");
            Ok(synthetic)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayfarer_core::{ScheduledRouteRecord, StopRecord, TimeInterval, Trip};

    fn data(depart: Timestamp) -> Arc<SharedRouteData> {
        let stops = (1..=3)
            .map(|id| StopRecord { id, coords: Coords::new(id as f64 * 100.0, 0.0), updated_at: 0 })
            .collect();
        let route = ScheduledRouteRecord {
            id: 10,
            stops: vec![1, 2],
            trips: vec![Trip {
                id: 1,
                times: vec![TimeInterval::exact(depart), TimeInterval::exact(depart + 60_000)],
            }],
            updated_at: 0,
        };
        Arc::new(SharedRouteData::new(stops, vec![route], vec![]))
    }

    fn query(source: Endpoint, target: Endpoint) -> RouteQuery {
        RouteQuery {
            source,
            target,
            departure: 0,
            settings: RunSettings::default(),
            direct_walk: None,
        }
    }

    #[test]
    fn stop_to_stop() {
        let engine = RouteComputeEngine::new(data(1_000));
        let run = engine.run(&query(Endpoint::Stop(1), Endpoint::Stop(2))).unwrap();
        assert_eq!(run.selection.fastest.arrival(), Some(61_000));
        assert_eq!((run.source, run.target), (1, 2));
    }

    #[test]
    fn points_are_attached_without_mutating_the_snapshot() {
        let engine = RouteComputeEngine::new(data(20_000));
        let source = Endpoint::Point {
            coords: Coords::new(90.0, 10.0),
            distances: HashMap::from([(1, 10.0)]),
        };
        let target = Endpoint::Point {
            coords: Coords::new(210.0, 10.0),
            distances: HashMap::from([(2, 20.0)]),
        };
        let run = engine.run(&query(source, target)).unwrap();

        assert_eq!(run.source, 4);
        assert_eq!(run.target, 5);
        // walk 10 s, wait, ride from 20 s to 80 s, walk 20 s
        assert_eq!(run.selection.fastest.arrival(), Some(100_000));
        assert!(run.data.stop(4).is_none());
        assert!(engine.snapshot().stop(1).unwrap().transfers.is_empty());
    }

    #[test]
    fn direct_walk_between_points() {
        let engine = RouteComputeEngine::new(data(1_000));
        let mut q = query(
            Endpoint::Point { coords: Coords::new(0.0, 0.0), distances: HashMap::new() },
            Endpoint::Point { coords: Coords::new(50.0, 0.0), distances: HashMap::new() },
        );
        assert!(matches!(engine.run(&q), Err(ComputeError::NoJourneyFound)));

        q.direct_walk = Some(50.0);
        let run = engine.run(&q).unwrap();
        assert_eq!(run.selection.shortest.steps.len(), 2);
        assert_eq!(run.selection.fastest.arrival(), Some(50_000));
    }

    #[test]
    fn unknown_stop_is_rejected() {
        let engine = RouteComputeEngine::new(data(1_000));
        assert!(matches!(
            engine.run(&query(Endpoint::Stop(1), Endpoint::Stop(99))),
            Err(ComputeError::UnknownStop(99))
        ));
    }

    #[test]
    fn swap_does_not_affect_a_taken_snapshot() {
        let engine = RouteComputeEngine::new(data(1_000));
        let before = engine.snapshot();
        engine.update_data(data(5_000));

        assert!(!Arc::ptr_eq(&before, &engine.snapshot()));
        let route = before.route(10).unwrap();
        assert_eq!(route.trips[0].times[0].low, 1_000);

        let run = engine.run(&query(Endpoint::Stop(1), Endpoint::Stop(2))).unwrap();
        assert_eq!(run.selection.fastest.arrival(), Some(65_000));
    }
}
