//! Walking graph built from path sections.
//!
//! Arbitrary coordinates enter the graph by being approached onto their
//! closest section. Request-scoped insertions split the section edge and must
//! be reverted before the graph is reused; permanent attachments (network
//! stops, component bridges) keep the section edge in place.

mod approach;
mod components;

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use wayfarer_core::geometry::segments_of;
use wayfarer_core::{Coords, FootNode, Section, SectionId, StopId, StopRecord, VertexId};

pub use approach::ApproachedPoint;
use approach::{approach, IndexedSegment};

use crate::error::GraphError;
use crate::weighted::{GraphExport, WeightedGraph};

pub type FootGraph = WeightedGraph<FootNode>;

/// Record of a request-scoped insertion, consumed by the matching revert.
#[derive(Debug, Clone, Copy, PartialEq)]
#[must_use = "every insertion must be reverted"]
pub struct Insertion {
    pub name: FootNode,
    pub s: FootNode,
    pub t: FootNode,
    /// Weight of the `(s, t)` edge removed by the insertion, if it existed.
    pub removed: Option<f64>,
}

/// One-to-one walking path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FootPath {
    pub distance: f64,
    pub path: Vec<FootNode>,
}

/// Walking distances from one point to every reachable network stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopDistances {
    pub distances: HashMap<StopId, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// Serializable snapshot of an engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FootGraphExport {
    pub graph: GraphExport<FootNode>,
    pub sections: Vec<Section>,
    pub approach_max_dist: f64,
}

#[derive(Debug, Clone)]
pub struct FootGraphEngine {
    graph: FootGraph,
    sections: IndexMap<SectionId, Section>,
    segments: Vec<IndexedSegment>,
    vertex_coords: HashMap<VertexId, Coords>,
    approach_max_dist: f64,
}

impl FootGraphEngine {
    /// Build the undirected walking graph of `sections`.
    ///
    /// Parallel sections between the same endpoints keep the shortest one.
    pub fn new(sections: impl IntoIterator<Item = Section>, approach_max_dist: f64) -> Self {
        let mut graph = WeightedGraph::undirected();
        let mut by_id = IndexMap::new();
        let mut vertex_coords = HashMap::new();

        for section in sections {
            if section.coords.len() < 2 {
                tracing::warn!(section = section.id, "skipping section without geometry");
                continue;
            }
            let (s, t) = (FootNode::Vertex(section.s), FootNode::Vertex(section.t));
            let keep = graph.weight(s, t).map_or(true, |w| section.distance < w);
            if keep {
                graph.add_edge(s, t, section.distance);
            }
            if let (Some(first), Some(last)) = (section.coords.first(), section.coords.last()) {
                vertex_coords.entry(section.s).or_insert(*first);
                vertex_coords.entry(section.t).or_insert(*last);
            }
            by_id.insert(section.id, section);
        }

        let segments = index_segments(by_id.values());

        tracing::debug!(
            nodes = graph.node_count(),
            sections = by_id.len(),
            segments = segments.len(),
            "foot graph built"
        );

        Self {
            graph,
            sections: by_id,
            segments,
            vertex_coords,
            approach_max_dist,
        }
    }

    pub fn graph(&self) -> &FootGraph {
        &self.graph
    }

    pub fn section(&self, id: SectionId) -> Option<&Section> {
        self.sections.get(&id)
    }

    pub fn approach_max_dist(&self) -> f64 {
        self.approach_max_dist
    }

    /// Project `coords` onto the closest section, if closer than the threshold.
    pub fn approach_point(&self, coords: Coords) -> Option<ApproachedPoint> {
        approach(&self.segments, coords, self.approach_max_dist)
    }

    pub fn require_approach(&self, coords: Coords) -> Result<ApproachedPoint, GraphError> {
        self.approach_point(coords)
            .ok_or(GraphError::UnapproachablePoint {
                coords,
                max_dist: self.approach_max_dist,
            })
    }

    fn endpoints(&self, ap: &ApproachedPoint) -> Result<(&Section, FootNode, FootNode), GraphError> {
        let section = self
            .sections
            .get(&ap.section)
            .ok_or(GraphError::UnknownSection(ap.section))?;
        Ok((section, FootNode::Vertex(section.s), FootNode::Vertex(section.t)))
    }

    /// Split the `(s, t)` edge of the approached section through `name`.
    pub fn insert_approached_point(
        &mut self,
        name: FootNode,
        ap: &ApproachedPoint,
    ) -> Result<Insertion, GraphError> {
        let (section, s, t) = self.endpoints(ap)?;
        let (from_s, to_t) = ap.access_weights(section);

        let removed = self.graph.remove_edge(s, t);
        self.graph.add_edge(s, name, from_s);
        self.graph.add_edge(name, t, to_t);

        Ok(Insertion { name, s, t, removed })
    }

    /// Undo an insertion: drop `name` and restore the original `(s, t)` weight.
    pub fn revert_approached_point(&mut self, insertion: Insertion) {
        self.graph.remove_node(insertion.name);
        if let Some(weight) = insertion.removed {
            self.graph.add_edge(insertion.s, insertion.t, weight);
        }
    }

    /// Run `f` with `points` inserted, reverting every insertion (in reverse
    /// order) before returning, including when an insertion fails midway.
    ///
    /// Points approached onto the same section are also joined to each other
    /// along it, since the first insertion already split the section edge.
    pub fn with_approached<R>(
        &mut self,
        points: &[(FootNode, ApproachedPoint)],
        f: impl FnOnce(&FootGraph) -> R,
    ) -> Result<R, GraphError> {
        let mut inserted = Vec::with_capacity(points.len());
        let mut failure = None;

        for (name, ap) in points {
            match self.insert_approached_point(*name, ap) {
                Ok(insertion) => inserted.push(insertion),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let result = match failure {
            None => {
                self.link_same_section(points);
                Ok(f(&self.graph))
            }
            Some(e) => Err(e),
        };

        for insertion in inserted.into_iter().rev() {
            self.revert_approached_point(insertion);
        }

        result
    }

    /// Direct edges between inserted points sharing a section. They go away
    /// with the points on revert.
    fn link_same_section(&mut self, points: &[(FootNode, ApproachedPoint)]) {
        for (i, (a, ap_a)) in points.iter().enumerate() {
            for (b, ap_b) in &points[i + 1..] {
                if ap_a.section != ap_b.section {
                    continue;
                }
                let Some(section) = self.sections.get(&ap_a.section) else { continue };
                let along = (ap_a.arc_position(section) - ap_b.arc_position(section)).abs();
                self.graph.add_edge(*a, *b, along + ap_a.distance + ap_b.distance);
            }
        }
    }

    /// Permanently connect `name` to both ends of the approached section.
    pub fn attach_point(&mut self, name: FootNode, ap: &ApproachedPoint) -> Result<(f64, f64), GraphError> {
        let (section, s, t) = self.endpoints(ap)?;
        let (from_s, to_t) = ap.access_weights(section);
        self.graph.add_edge(s, name, from_s);
        self.graph.add_edge(name, t, to_t);
        Ok((from_s, to_t))
    }

    /// Attach every approachable stop as a `FootNode::Stop`. Returns how many were attached.
    pub fn attach_stops<'a>(&mut self, stops: impl IntoIterator<Item = &'a StopRecord>) -> usize {
        let mut attached = 0;
        for stop in stops {
            let Some(ap) = self.approach_point(stop.coords) else {
                tracing::debug!(stop = stop.id, "stop not approachable, left out of foot graph");
                continue;
            };
            if self.attach_point(FootNode::Stop(stop.id), &ap).is_ok() {
                attached += 1;
            }
        }
        attached
    }

    /// One-to-one walking path between two arbitrary points.
    ///
    /// The reported distance is recomputed along the returned path.
    pub fn shortest_path(&mut self, from: Coords, to: Coords) -> Result<FootPath, GraphError> {
        let aps = self.require_approach(from)?;
        let apt = self.require_approach(to)?;

        let found = self.with_approached(
            &[(FootNode::Source, aps), (FootNode::Target, apt)],
            |graph| {
                let path = graph.shortest_path(FootNode::Source, FootNode::Target);
                let distance = graph.path_weight(&path);
                (path, distance)
            },
        )?;

        match found {
            (path, Some(distance)) if !path.is_empty() => Ok(FootPath { distance, path }),
            _ => Err(GraphError::NoPath {
                from: format!("({}, {})", from.x, from.y),
                to: format!("({}, {})", to.x, to.y),
            }),
        }
    }

    /// Bounded walking distances from `from` to every attached stop.
    pub fn one_to_all(
        &mut self,
        from: Coords,
        max_dist: f64,
        alias: Option<String>,
    ) -> Result<StopDistances, GraphError> {
        let aps = self.require_approach(from)?;

        let reached = self.with_approached(&[(FootNode::Source, aps)], |graph| {
            graph.distances_from(&[FootNode::Source], Some(max_dist))
        })?;

        let distances = reached
            .into_iter()
            .filter_map(|(node, d)| node.stop_id().map(|id| (id, d)))
            .collect();

        Ok(StopDistances { distances, alias })
    }

    pub fn export(&self) -> FootGraphExport {
        FootGraphExport {
            graph: self.graph.export(),
            sections: self.sections.values().cloned().collect(),
            approach_max_dist: self.approach_max_dist,
        }
    }

    pub fn import(data: FootGraphExport) -> Self {
        let mut engine = Self::new(Vec::new(), data.approach_max_dist);
        for section in data.sections {
            if let (Some(first), Some(last)) = (section.coords.first(), section.coords.last()) {
                engine.vertex_coords.entry(section.s).or_insert(*first);
                engine.vertex_coords.entry(section.t).or_insert(*last);
            }
            engine.sections.insert(section.id, section);
        }
        engine.segments = index_segments(engine.sections.values());
        engine.graph = WeightedGraph::import(data.graph);
        engine
    }
}

fn index_segments<'a>(sections: impl Iterator<Item = &'a Section>) -> Vec<IndexedSegment> {
    sections
        .flat_map(|section| {
            segments_of(&section.coords)
                .into_iter()
                .enumerate()
                .map(move |(index, segment)| IndexedSegment {
                    section: section.id,
                    index,
                    segment,
                })
        })
        .collect()
}
