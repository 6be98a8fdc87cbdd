use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::Coords;

pub type StopId = u64;
pub type RouteId = u64;
pub type TripId = u64;
pub type SectionId = u64;
pub type VertexId = u64;
pub type AddressId = u64;
pub type ResultId = Uuid;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Sentinel used for schedule entries without a usable time.
pub const UNREACHABLE_TIME: Timestamp = Timestamp::MAX;

pub fn now_ms() -> Timestamp {
    Utc::now().timestamp_millis()
}

// ── Source projections ────────────────────────────────────────

/// Read-only projection of a network stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopRecord {
    pub id: StopId,
    pub coords: Coords,
    #[serde(default)]
    pub updated_at: Timestamp,
}

/// Arrival/departure bounds at one stop of a trip: theoretical and estimated time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub low: Timestamp,
    pub high: Timestamp,
}

impl TimeInterval {
    pub const fn exact(at: Timestamp) -> Self {
        Self { low: at, high: at }
    }

    pub const fn unreachable() -> Self {
        Self::exact(UNREACHABLE_TIME)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: TripId,
    /// One interval per stop of the owning route.
    pub times: Vec<TimeInterval>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledRouteRecord {
    pub id: RouteId,
    pub stops: Vec<StopId>,
    pub trips: Vec<Trip>,
    #[serde(default)]
    pub updated_at: Timestamp,
}

impl ScheduledRouteRecord {
    /// Every trip carries exactly one time interval per stop.
    pub fn is_consistent(&self) -> bool {
        self.trips.iter().all(|trip| trip.times.len() == self.stops.len())
    }
}

/// A walkable path section between two graph vertices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    /// Ordered polyline, from `s` to `t`.
    pub coords: Vec<Coords>,
    /// Cumulative length of the polyline.
    pub distance: f64,
    pub s: VertexId,
    pub t: VertexId,
    #[serde(default)]
    pub updated_at: Timestamp,
}

/// Node of a foot graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum FootNode {
    /// Section endpoint.
    Vertex(VertexId),
    /// Network stop attached onto the graph.
    Stop(StopId),
    /// Request-scoped approached source point.
    Source,
    /// Request-scoped approached target point.
    Target,
}

impl FootNode {
    pub fn stop_id(&self) -> Option<StopId> {
        match self {
            FootNode::Stop(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for FootNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FootNode::Vertex(id) => write!(f, "v-{}", id),
            FootNode::Stop(id) => write!(f, "as-{}", id),
            FootNode::Source => write!(f, "aps"),
            FootNode::Target => write!(f, "apt"),
        }
    }
}

/// Precomputed walking path between two stops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonScheduledRoute {
    pub from: StopId,
    pub to: StopId,
    pub distance: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<FootNode>>,
}

// ── Requests ──────────────────────────────────────────────────

/// Journey endpoint as received from the API layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Location {
    Stop { id: StopId, coords: Coords },
    Address { id: AddressId, coords: Coords },
}

impl Location {
    pub fn coords(&self) -> Coords {
        match self {
            Location::Stop { coords, .. } | Location::Address { coords, .. } => *coords,
        }
    }

    pub fn is_address(&self) -> bool {
        matches!(self, Location::Address { .. })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Stop { id, .. } => write!(f, "stop:{}", id),
            Location::Address { id, .. } => write!(f, "address:{}", id),
        }
    }
}
