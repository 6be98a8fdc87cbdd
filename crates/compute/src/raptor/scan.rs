//! Round-based earliest-arrival scan.
//!
//! Round `k` holds the best arrival at every stop using at most `k` vehicle
//! legs. Each round rides every route serving a stop improved in the previous
//! round, then walks the transfers of the stops it just reached. Arrivals
//! not better than the best known arrival at the target are pruned.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use wayfarer_core::{RouteId, StopId, Timestamp, UNREACHABLE_TIME};

use super::data::{RaptorRoute, RouteDataView};
use super::journey::{Journey, JourneyStep, RunSettings};

#[derive(Debug, Clone, Copy)]
enum Parent {
    Departure,
    Foot { from: StopId, length: f64 },
    Vehicle { route: RouteId, trip_index: usize, boarded_at: StopId },
}

#[derive(Debug, Clone, Copy)]
struct Label {
    time: Timestamp,
    parent: Parent,
    /// Round that produced this label.
    round: usize,
}

struct Scan<'a> {
    view: &'a RouteDataView,
    settings: &'a RunSettings,
    target: StopId,
    rounds: Vec<HashMap<StopId, Label>>,
    best: HashMap<StopId, Timestamp>,
    target_rounds: BTreeSet<usize>,
}

/// Journeys from `source` to `target`, one per round that improved the arrival.
pub fn scan(
    view: &RouteDataView,
    source: StopId,
    target: StopId,
    departure: Timestamp,
    settings: &RunSettings,
) -> Vec<Journey> {
    let mut scan = Scan {
        view,
        settings,
        target,
        rounds: Vec::with_capacity(settings.max_rounds + 1),
        best: HashMap::new(),
        target_rounds: BTreeSet::new(),
    };
    scan.run(source, departure);
    scan.journeys()
}

impl<'a> Scan<'a> {
    fn best(&self, stop: StopId) -> Timestamp {
        self.best.get(&stop).copied().unwrap_or(UNREACHABLE_TIME)
    }

    fn improve(&mut self, stop: StopId, label: Label) -> bool {
        if label.time >= self.best(stop).min(self.best(self.target)) {
            return false;
        }
        self.best.insert(stop, label.time);
        self.rounds[label.round].insert(stop, label);
        if stop == self.target {
            self.target_rounds.insert(label.round);
        }
        true
    }

    fn run(&mut self, source: StopId, departure: Timestamp) {
        self.rounds.push(HashMap::new());
        self.improve(source, Label { time: departure, parent: Parent::Departure, round: 0 });

        let mut marked = BTreeSet::from([source]);
        marked.extend(self.walk(0, &marked));

        for round in 1..=self.settings.max_rounds {
            let previous = self.rounds[round - 1].clone();
            self.rounds.push(previous);

            let reached = self.ride(round, &marked);
            if reached.is_empty() {
                tracing::trace!(round, "no stop improved, scan finished");
                break;
            }
            let walked = self.walk(round, &reached);
            marked = reached;
            marked.extend(walked);
        }
    }

    /// Ride every route serving a marked stop, from its first marked position.
    fn ride(&mut self, round: usize, marked: &BTreeSet<StopId>) -> BTreeSet<StopId> {
        let view = self.view;
        let mut queue: BTreeMap<RouteId, usize> = BTreeMap::new();
        for &stop in marked {
            let Some(s) = view.stop(stop) else { continue };
            for &route_id in &s.routes {
                let Some(position) = view.route(route_id).and_then(|r| r.position(stop)) else {
                    continue;
                };
                queue
                    .entry(route_id)
                    .and_modify(|p| *p = (*p).min(position))
                    .or_insert(position);
            }
        }

        let mut reached = BTreeSet::new();
        for (route_id, start) in queue {
            let Some(route) = view.route(route_id) else { continue };
            // (trip index, boarding stop)
            let mut current: Option<(usize, StopId)> = None;

            for i in start..route.stops.len() {
                let stop = route.stops[i];

                if let Some((trip_index, boarded_at)) = current {
                    let arrival = route.trips[trip_index].times[i].low;
                    let label = Label {
                        time: arrival,
                        parent: Parent::Vehicle { route: route_id, trip_index, boarded_at },
                        round,
                    };
                    if arrival != UNREACHABLE_TIME && self.improve(stop, label) {
                        reached.insert(stop);
                    }
                }

                let Some(ready) = self.rounds[round - 1].get(&stop).map(|l| l.time) else {
                    continue;
                };
                let riding = current.map(|(t, _)| route.trips[t].times[i].low);
                if riding.map_or(true, |d| ready <= d) {
                    if let Some(t) = earliest_trip(route, i, ready) {
                        if riding.map_or(true, |d| route.trips[t].times[i].low < d) {
                            current = Some((t, stop));
                        }
                    }
                }
            }
        }
        reached
    }

    /// Walk the transfers of `from`, bounded by the maximum transfer length.
    fn walk(&mut self, round: usize, from: &BTreeSet<StopId>) -> BTreeSet<StopId> {
        let view = self.view;
        let settings = self.settings;
        let mut walked = BTreeSet::new();

        for &stop in from {
            let Some(ready) = self.rounds[round].get(&stop).map(|l| l.time) else { continue };
            let Some(s) = view.stop(stop) else { continue };

            for transfer in &s.transfers {
                if transfer.length > settings.max_transfer_length {
                    continue;
                }
                let time = ready.saturating_add(settings.walk_duration(transfer.length));
                if time == UNREACHABLE_TIME {
                    continue;
                }
                let label = Label {
                    time,
                    parent: Parent::Foot { from: stop, length: transfer.length },
                    round,
                };
                if self.improve(transfer.to, label) {
                    walked.insert(transfer.to);
                }
            }
        }
        walked
    }

    fn journeys(&self) -> Vec<Journey> {
        self.target_rounds
            .iter()
            .filter_map(|&round| {
                let journey = self.trace(round);
                if journey.is_none() {
                    tracing::warn!(round, target = self.target, "broken label chain, journey dropped");
                }
                journey
            })
            .collect()
    }

    fn trace(&self, round: usize) -> Option<Journey> {
        let mut steps = Vec::new();
        let mut stop = self.target;
        let mut label = *self.rounds[round].get(&stop)?;

        // Every step moves strictly back in rounds or in time
        let limit = 2 * self.rounds.len() + self.best.len() + 2;
        for _ in 0..limit {
            match label.parent {
                Parent::Departure => {
                    steps.push(JourneyStep::Departure { at: stop, time: label.time });
                    steps.reverse();
                    return Some(Journey { steps });
                }
                Parent::Foot { from, length } => {
                    steps.push(JourneyStep::Foot { from, to: stop, length, time: label.time });
                    label = *self.rounds[label.round].get(&from)?;
                    stop = from;
                }
                Parent::Vehicle { route, trip_index, boarded_at } => {
                    steps.push(JourneyStep::Vehicle {
                        boarded_at,
                        alighted_at: stop,
                        route,
                        trip_index,
                        time: label.time,
                    });
                    label = *self.rounds[label.round.checked_sub(1)?].get(&boarded_at)?;
                    stop = boarded_at;
                }
            }
        }
        None
    }
}

/// Trip leaving position `i` the earliest, no sooner than `ready`.
fn earliest_trip(route: &RaptorRoute, i: usize, ready: Timestamp) -> Option<usize> {
    route
        .trips
        .iter()
        .enumerate()
        .map(|(index, trip)| (index, trip.times[i].low))
        .filter(|(_, time)| *time >= ready && *time != UNREACHABLE_TIME)
        .min_by_key(|(_, time)| *time)
        .map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use wayfarer_core::{Coords, NonScheduledRoute, ScheduledRouteRecord, StopRecord, TimeInterval, Trip};

    use crate::raptor::data::SharedRouteData;

    fn stops(ids: &[StopId]) -> Vec<StopRecord> {
        ids.iter()
            .map(|&id| StopRecord { id, coords: Coords::new(id as f64, 0.0), updated_at: 0 })
            .collect()
    }

    fn route(id: RouteId, stops: Vec<StopId>, trips: &[&[Timestamp]]) -> ScheduledRouteRecord {
        ScheduledRouteRecord {
            id,
            stops,
            trips: trips
                .iter()
                .enumerate()
                .map(|(i, times)| Trip {
                    id: i as u64,
                    times: times.iter().copied().map(TimeInterval::exact).collect(),
                })
                .collect(),
            updated_at: 0,
        }
    }

    /// 1 --r10--> 2 --r20--> 3, plus a 1 km walk from 1 to 3.
    fn network() -> RouteDataView {
        let data = SharedRouteData::new(
            stops(&[1, 2, 3]),
            vec![
                route(10, vec![1, 2], &[&[100, 200], &[1_000, 1_100]]),
                route(20, vec![2, 3], &[&[250, 350], &[300, 400]]),
            ],
            vec![NonScheduledRoute { from: 1, to: 3, distance: 1_000.0, path: None }],
        );
        RouteDataView::new(Arc::new(data))
    }

    #[test]
    fn rides_and_walks_are_both_reported() {
        let view = network();
        let journeys = scan(&view, 1, 3, 0, &RunSettings::default());
        assert_eq!(journeys.len(), 2);

        let walk = &journeys[0];
        assert_eq!(walk.steps.len(), 2);
        assert_eq!(walk.arrival(), Some(1_000_000));

        let ride = &journeys[1];
        assert_eq!(ride.rides(), 2);
        assert_eq!(ride.arrival(), Some(350));
        assert!(matches!(
            ride.steps[1],
            JourneyStep::Vehicle { boarded_at: 1, alighted_at: 2, route: 10, trip_index: 0, .. }
        ));
        assert!(matches!(
            ride.steps[2],
            JourneyStep::Vehicle { boarded_at: 2, alighted_at: 3, route: 20, trip_index: 0, .. }
        ));
    }

    #[test]
    fn missed_connection_takes_later_trip() {
        let view = network();
        let journeys = scan(&view, 1, 3, 150, &RunSettings::default());
        // Trip 1 of r10 reaches 2 at 1100, after every r20 departure
        assert_eq!(journeys.len(), 1);
        assert_eq!(journeys[0].rides(), 0);
    }

    #[test]
    fn long_transfers_are_not_walked() {
        let view = network();
        let settings = RunSettings { max_transfer_length: 500.0, ..RunSettings::default() };
        let journeys = scan(&view, 1, 3, 150, &settings);
        assert!(journeys.is_empty());
    }

    #[test]
    fn round_limit_bounds_rides() {
        let view = network();
        let settings = RunSettings { max_rounds: 1, ..RunSettings::default() };
        let journeys = scan(&view, 1, 3, 0, &settings);
        assert!(journeys.iter().all(|j| j.rides() <= 1));
        assert_eq!(journeys.len(), 1);
    }

    #[test]
    fn unreachable_entries_are_skipped() {
        let data = SharedRouteData::new(
            stops(&[1, 2, 3]),
            vec![route(10, vec![1, 2, 3], &[&[100, UNREACHABLE_TIME, 300]])],
            vec![],
        );
        let view = RouteDataView::new(Arc::new(data));
        let journeys = scan(&view, 1, 3, 0, &RunSettings::default());
        assert_eq!(journeys.len(), 1);
        assert_eq!(journeys[0].arrival(), Some(300));

        let none = scan(&view, 2, 3, 0, &RunSettings::default());
        assert!(none.is_empty());
    }
}
