use std::collections::HashSet;

use wayfarer_core::FootNode;

use super::approach::{approach, IndexedSegment};
use super::FootGraphEngine;

impl FootGraphEngine {
    /// Connected components, in discovery order.
    pub fn components(&self) -> Vec<HashSet<FootNode>> {
        let mut unvisited: Vec<FootNode> = self.graph.nodes().collect();
        let mut seen: HashSet<FootNode> = HashSet::new();
        let mut components = Vec::new();

        unvisited.reverse();
        while let Some(start) = unvisited.pop() {
            if seen.contains(&start) {
                continue;
            }
            let component: HashSet<FootNode> = self
                .graph
                .distances_from(&[start], None)
                .into_keys()
                .collect();
            seen.extend(component.iter().copied());
            components.push(component);
        }

        components
    }

    /// Bridge every component onto the largest one.
    ///
    /// The minimum-degree nodes of each smaller component are approached onto
    /// the sections of the largest component and attached permanently when
    /// closer than `max_dist`. Returns the number of bridges added.
    pub fn connect_components(&mut self, max_dist: f64) -> usize {
        let mut components = self.components();
        if components.len() <= 1 {
            return 0;
        }

        let largest_idx = components
            .iter()
            .enumerate()
            .fold(0, |best, (i, c)| if c.len() > components[best].len() { i } else { best });
        let largest = components.swap_remove(largest_idx);

        let targets: Vec<IndexedSegment> = self
            .segments
            .iter()
            .filter(|seg| {
                self.sections.get(&seg.section).map_or(false, |section| {
                    largest.contains(&FootNode::Vertex(section.s))
                        || largest.contains(&FootNode::Vertex(section.t))
                })
            })
            .copied()
            .collect();

        let mut bridges = Vec::new();
        for component in &components {
            let min_degree = component
                .iter()
                .map(|n| self.graph.degree(*n))
                .min()
                .unwrap_or(0);

            for end in component.iter().filter(|n| self.graph.degree(**n) == min_degree) {
                let FootNode::Vertex(vertex) = end else { continue };
                let Some(coords) = self.vertex_coords.get(vertex) else {
                    continue;
                };
                if let Some(ap) = approach(&targets, *coords, max_dist) {
                    bridges.push((*end, ap));
                }
            }
        }

        let mut connected = 0;
        for (end, ap) in bridges {
            if self.attach_point(end, &ap).is_ok() {
                connected += 1;
            }
        }

        tracing::info!(
            components = components.len() + 1,
            largest = largest.len(),
            bridges = connected,
            "foot graph components connected"
        );
        connected
    }
}
