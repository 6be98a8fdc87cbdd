use std::hash::Hash;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Adjacency-map graph with `f64` edge weights.
///
/// Undirected graphs store every edge in both directions. Edge removal uses
/// `swap_remove`, so neighbor iteration order is not stable across mutations.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedGraph<N: Copy + Eq + Hash> {
    adjacency: IndexMap<N, IndexMap<N, f64>>,
    directed: bool,
}

/// Flat representation used to move a graph across threads or to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphExport<N> {
    pub directed: bool,
    pub nodes: Vec<N>,
    pub edges: Vec<(N, N, f64)>,
}

impl<N: Copy + Eq + Hash> WeightedGraph<N> {
    pub fn directed() -> Self {
        Self {
            adjacency: IndexMap::new(),
            directed: true,
        }
    }

    pub fn undirected() -> Self {
        Self {
            adjacency: IndexMap::new(),
            directed: false,
        }
    }

    pub fn is_directed(&self) -> bool {
        self.directed
    }

    pub fn add_node(&mut self, node: N) {
        self.adjacency.entry(node).or_default();
    }

    /// Insert or overwrite the edge `u -> v` (and `v -> u` when undirected).
    pub fn add_edge(&mut self, u: N, v: N, weight: f64) {
        self.adjacency.entry(u).or_default().insert(v, weight);
        let reverse = self.adjacency.entry(v).or_default();
        if !self.directed {
            reverse.insert(u, weight);
        }
    }

    /// Remove `u -> v`, returning its weight. Missing edges are a no-op.
    pub fn remove_edge(&mut self, u: N, v: N) -> Option<f64> {
        let removed = self
            .adjacency
            .get_mut(&u)
            .and_then(|neighbors| neighbors.swap_remove(&v));
        if !self.directed {
            if let Some(neighbors) = self.adjacency.get_mut(&v) {
                neighbors.swap_remove(&u);
            }
        }
        removed
    }

    /// Remove a node together with every edge touching it.
    pub fn remove_node(&mut self, node: N) {
        if self.adjacency.swap_remove(&node).is_none() {
            return;
        }
        for neighbors in self.adjacency.values_mut() {
            neighbors.swap_remove(&node);
        }
    }

    pub fn weight(&self, u: N, v: N) -> Option<f64> {
        self.adjacency.get(&u).and_then(|n| n.get(&v)).copied()
    }

    pub fn contains_node(&self, node: N) -> bool {
        self.adjacency.contains_key(&node)
    }

    pub fn neighbors(&self, node: N) -> impl Iterator<Item = (N, f64)> + '_ {
        self.adjacency
            .get(&node)
            .into_iter()
            .flat_map(|n| n.iter().map(|(v, w)| (*v, *w)))
    }

    pub fn degree(&self, node: N) -> usize {
        self.adjacency.get(&node).map_or(0, IndexMap::len)
    }

    pub fn nodes(&self) -> impl Iterator<Item = N> + '_ {
        self.adjacency.keys().copied()
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Every stored edge; undirected edges are listed once.
    pub fn edges(&self) -> Vec<(N, N, f64)> {
        let mut edges = Vec::new();
        for (ui, (u, neighbors)) in self.adjacency.iter().enumerate() {
            for (v, w) in neighbors {
                if !self.directed {
                    let vi = self.adjacency.get_index_of(v).unwrap_or(usize::MAX);
                    if vi < ui {
                        continue;
                    }
                }
                edges.push((*u, *v, *w));
            }
        }
        edges
    }

    pub fn edge_count(&self) -> usize {
        self.edges().len()
    }

    /// Sum of edge weights along `path`, `None` if an edge is missing.
    pub fn path_weight(&self, path: &[N]) -> Option<f64> {
        path.windows(2)
            .map(|pair| self.weight(pair[0], pair[1]))
            .sum()
    }

    pub fn export(&self) -> GraphExport<N> {
        GraphExport {
            directed: self.directed,
            nodes: self.nodes().collect(),
            edges: self.edges(),
        }
    }

    pub fn import(data: GraphExport<N>) -> Self {
        let mut graph = if data.directed {
            Self::directed()
        } else {
            Self::undirected()
        };
        for node in data.nodes {
            graph.add_node(node);
        }
        for (u, v, w) in data.edges {
            graph.add_edge(u, v, w);
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undirected_edges_are_symmetric() {
        let mut g = WeightedGraph::undirected();
        g.add_edge(1u32, 2, 3.5);
        assert_eq!(g.weight(1, 2), Some(3.5));
        assert_eq!(g.weight(2, 1), Some(3.5));
        assert_eq!(g.edge_count(), 1);

        assert_eq!(g.remove_edge(2, 1), Some(3.5));
        assert_eq!(g.weight(1, 2), None);
        assert_eq!(g.edge_count(), 0);
        assert_eq!(g.node_count(), 2);
    }

    #[test]
    fn directed_edges_are_one_way() {
        let mut g = WeightedGraph::directed();
        g.add_edge('a', 'b', 1.0);
        assert_eq!(g.weight('b', 'a'), None);
        assert!(g.contains_node('b'));
        assert_eq!(g.degree('a'), 1);
        assert_eq!(g.degree('b'), 0);
    }

    #[test]
    fn removing_missing_edge_is_noop() {
        let mut g = WeightedGraph::undirected();
        g.add_edge(1u8, 2, 1.0);
        let before = g.clone();
        assert_eq!(g.remove_edge(1, 3), None);
        assert_eq!(g.remove_edge(7, 8), None);
        assert_eq!(g.edges(), before.edges());
    }

    #[test]
    fn remove_node_drops_incident_edges() {
        let mut g = WeightedGraph::undirected();
        g.add_edge(1u8, 2, 1.0);
        g.add_edge(2, 3, 1.0);
        g.remove_node(2);
        assert!(!g.contains_node(2));
        assert_eq!(g.degree(1), 0);
        assert_eq!(g.degree(3), 0);
    }

    #[test]
    fn path_weight_requires_every_edge() {
        let mut g = WeightedGraph::directed();
        g.add_edge(1u8, 2, 1.5);
        g.add_edge(2, 3, 2.0);
        assert_eq!(g.path_weight(&[1, 2, 3]), Some(3.5));
        assert_eq!(g.path_weight(&[1, 3]), None);
        assert_eq!(g.path_weight(&[1]), Some(0.0));
    }

    #[test]
    fn export_import_preserves_edges() {
        let mut g = WeightedGraph::undirected();
        g.add_edge(1u64, 2, 1.0);
        g.add_edge(2, 3, 2.0);
        g.add_node(9);

        let json = serde_json::to_string(&g.export()).unwrap();
        let back = WeightedGraph::import(serde_json::from_str(&json).unwrap());

        assert!(!back.is_directed());
        assert!(back.contains_node(9));
        assert_eq!(back.weight(3, 2), Some(2.0));
        assert_eq!(back.edge_count(), 2);
    }
}
