//! Route data consumed by the journey scan.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use wayfarer_core::{Coords, NonScheduledRoute, RouteId, ScheduledRouteRecord, StopId, StopRecord, Trip};

/// Walking edge between two stops.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub to: StopId,
    pub length: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaptorStop {
    pub id: StopId,
    pub coords: Coords,
    /// Routes serving this stop.
    pub routes: Vec<RouteId>,
    pub transfers: Vec<Transfer>,
}

impl RaptorStop {
    pub fn new(id: StopId, coords: Coords) -> Self {
        Self { id, coords, routes: Vec::new(), transfers: Vec::new() }
    }

    /// Add a transfer, keeping the shortest one per destination.
    pub fn merge_transfer(&mut self, transfer: Transfer) {
        match self.transfers.iter_mut().find(|t| t.to == transfer.to) {
            Some(existing) => existing.length = existing.length.min(transfer.length),
            None => self.transfers.push(transfer),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaptorRoute {
    pub id: RouteId,
    pub stops: Vec<StopId>,
    pub trips: Vec<Trip>,
}

impl RaptorRoute {
    /// First position of `stop` along the route.
    pub fn position(&self, stop: StopId) -> Option<usize> {
        self.stops.iter().position(|s| *s == stop)
    }
}

/// Immutable route snapshot, shared by every query running against it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SharedRouteData {
    stops: HashMap<StopId, RaptorStop>,
    routes: HashMap<RouteId, RaptorRoute>,
    max_stop_id: StopId,
}

impl SharedRouteData {
    /// Build the snapshot. Routes with inconsistent trips or unknown stops are skipped.
    pub fn new(
        stops: Vec<StopRecord>,
        routes: Vec<ScheduledRouteRecord>,
        non_scheduled: Vec<NonScheduledRoute>,
    ) -> Self {
        let max_stop_id = stops.iter().map(|s| s.id).max().unwrap_or(0);
        let mut by_id: HashMap<StopId, RaptorStop> = stops
            .into_iter()
            .map(|s| (s.id, RaptorStop::new(s.id, s.coords)))
            .collect();

        let mut kept = HashMap::with_capacity(routes.len());
        for route in routes {
            if !route.is_consistent() {
                tracing::warn!(route = route.id, "skipping route with trips not matching its stops");
                continue;
            }
            if let Some(missing) = route.stops.iter().find(|s| !by_id.contains_key(s)) {
                tracing::warn!(route = route.id, stop = missing, "skipping route serving an unknown stop");
                continue;
            }
            for stop_id in &route.stops {
                if let Some(stop) = by_id.get_mut(stop_id) {
                    if !stop.routes.contains(&route.id) {
                        stop.routes.push(route.id);
                    }
                }
            }
            kept.insert(
                route.id,
                RaptorRoute { id: route.id, stops: route.stops, trips: route.trips },
            );
        }

        let mut transfers = 0usize;
        for nsr in non_scheduled {
            if nsr.from == nsr.to || !by_id.contains_key(&nsr.to) {
                continue;
            }
            if let Some(stop) = by_id.get_mut(&nsr.from) {
                stop.merge_transfer(Transfer { to: nsr.to, length: nsr.distance });
                transfers += 1;
            }
        }

        tracing::debug!(
            stops = by_id.len(),
            routes = kept.len(),
            transfers,
            "route data assembled"
        );

        Self { stops: by_id, routes: kept, max_stop_id }
    }

    pub fn stop(&self, id: StopId) -> Option<&RaptorStop> {
        self.stops.get(&id)
    }

    pub fn route(&self, id: RouteId) -> Option<&RaptorRoute> {
        self.routes.get(&id)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.len()
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Synthetic stops are numbered past this id.
    pub fn max_stop_id(&self) -> StopId {
        self.max_stop_id
    }
}

/// Copy-on-write view over a snapshot: attached stops and modified transfers
/// live in an overlay, the base stays untouched.
#[derive(Debug, Clone)]
pub struct RouteDataView {
    base: Arc<SharedRouteData>,
    overlay: HashMap<StopId, RaptorStop>,
}

impl RouteDataView {
    pub fn new(base: Arc<SharedRouteData>) -> Self {
        Self { base, overlay: HashMap::new() }
    }

    pub fn base(&self) -> &Arc<SharedRouteData> {
        &self.base
    }

    pub fn stop(&self, id: StopId) -> Option<&RaptorStop> {
        self.overlay.get(&id).or_else(|| self.base.stop(id))
    }

    pub fn route(&self, id: RouteId) -> Option<&RaptorRoute> {
        self.base.route(id)
    }

    pub fn contains_stop(&self, id: StopId) -> bool {
        self.stop(id).is_some()
    }

    fn stop_mut(&mut self, id: StopId) -> Option<&mut RaptorStop> {
        if !self.overlay.contains_key(&id) {
            let copy = self.base.stop(id)?.clone();
            self.overlay.insert(id, copy);
        }
        self.overlay.get_mut(&id)
    }

    /// Add a walking edge in both directions. Unknown endpoints are ignored.
    pub fn add_transfer(&mut self, a: StopId, b: StopId, length: f64) -> bool {
        if a == b || !self.contains_stop(a) || !self.contains_stop(b) {
            return false;
        }
        if let Some(stop) = self.stop_mut(a) {
            stop.merge_transfer(Transfer { to: b, length });
        }
        if let Some(stop) = self.stop_mut(b) {
            stop.merge_transfer(Transfer { to: a, length });
        }
        true
    }

    /// Attach a synthetic stop linked by walking edges to nearby stops.
    ///
    /// Returns the number of transfers attached.
    pub fn attach_stop(
        &mut self,
        id: StopId,
        coords: Coords,
        distances: impl IntoIterator<Item = (StopId, f64)>,
    ) -> usize {
        self.overlay.insert(id, RaptorStop::new(id, coords));
        distances
            .into_iter()
            .filter(|(to, length)| length.is_finite() && self.add_transfer(id, *to, *length))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayfarer_core::TimeInterval;

    fn stop(id: StopId, x: f64) -> StopRecord {
        StopRecord { id, coords: Coords::new(x, 0.0), updated_at: 0 }
    }

    fn route(id: RouteId, stops: Vec<StopId>, times: Vec<i64>) -> ScheduledRouteRecord {
        ScheduledRouteRecord {
            id,
            stops,
            trips: vec![Trip { id: 1, times: times.into_iter().map(TimeInterval::exact).collect() }],
            updated_at: 0,
        }
    }

    #[test]
    fn inconsistent_and_dangling_routes_are_skipped() {
        let data = SharedRouteData::new(
            vec![stop(1, 0.0), stop(2, 10.0)],
            vec![
                route(1, vec![1, 2], vec![0, 10]),
                route(2, vec![1, 2], vec![0]),
                route(3, vec![1, 9], vec![0, 10]),
            ],
            vec![],
        );
        assert_eq!(data.route_count(), 1);
        assert_eq!(data.stop(1).unwrap().routes, vec![1]);
        assert_eq!(data.max_stop_id(), 2);
    }

    #[test]
    fn non_scheduled_routes_become_transfers() {
        let nsr = |from, to, distance| NonScheduledRoute { from, to, distance, path: None };
        let data = SharedRouteData::new(
            vec![stop(1, 0.0), stop(2, 10.0)],
            vec![],
            vec![nsr(1, 2, 12.0), nsr(1, 2, 11.0), nsr(1, 1, 0.0), nsr(1, 7, 3.0)],
        );
        assert_eq!(data.stop(1).unwrap().transfers, vec![Transfer { to: 2, length: 11.0 }]);
        assert!(data.stop(2).unwrap().transfers.is_empty());
    }

    #[test]
    fn attaching_leaves_the_snapshot_untouched() {
        let base = Arc::new(SharedRouteData::new(vec![stop(1, 0.0), stop(2, 10.0)], vec![], vec![]));
        let mut view = RouteDataView::new(Arc::clone(&base));

        let synthetic = base.max_stop_id() + 1;
        let attached = view.attach_stop(synthetic, Coords::new(5.0, 5.0), [(1, 7.0), (2, 8.0), (9, 1.0)]);
        assert_eq!(attached, 2);

        assert_eq!(view.stop(1).unwrap().transfers, vec![Transfer { to: synthetic, length: 7.0 }]);
        assert_eq!(view.stop(synthetic).unwrap().transfers.len(), 2);
        assert!(base.stop(1).unwrap().transfers.is_empty());
        assert!(base.stop(synthetic).is_none());
    }
}
