use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::hash::Hash;

use crate::weighted::WeightedGraph;

/// A priority queue entry for Dijkstra's algorithm.
///
/// Uses reversed ordering so `BinaryHeap` (a max-heap) behaves as a min-heap.
#[derive(Debug, Clone)]
struct State<N> {
    distance: f64,
    node: N,
}

impl<N> PartialEq for State<N> {
    fn eq(&self, other: &Self) -> bool {
        self.distance.total_cmp(&other.distance) == Ordering::Equal
    }
}

impl<N> Eq for State<N> {}

impl<N> Ord for State<N> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap behavior
        other.distance.total_cmp(&self.distance)
    }
}

impl<N> PartialOrd for State<N> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
pub struct DijkstraOptions<N> {
    /// Stop as soon as every target is settled.
    pub targets: Option<Vec<N>>,
    /// Nodes farther than this from every source are not reported.
    pub max_cumulative_weight: Option<f64>,
}

impl<N> Default for DijkstraOptions<N> {
    fn default() -> Self {
        Self {
            targets: None,
            max_cumulative_weight: None,
        }
    }
}

/// Distances and predecessor links of a Dijkstra run.
#[derive(Debug, Clone)]
pub struct ShortestPaths<N: Copy + Eq + Hash> {
    pub distances: HashMap<N, f64>,
    pub previous: HashMap<N, N>,
}

impl<N: Copy + Eq + Hash> ShortestPaths<N> {
    pub fn distance(&self, node: N) -> Option<f64> {
        self.distances.get(&node).copied()
    }

    /// Path from the closest source to `target`, empty if unreached.
    pub fn trace_path(&self, target: N) -> Vec<N> {
        if !self.distances.contains_key(&target) {
            return Vec::new();
        }

        let mut path = vec![target];
        let mut current = target;
        while let Some(prev) = self.previous.get(&current) {
            current = *prev;
            path.push(current);
        }
        path.reverse();
        path
    }
}

impl<N: Copy + Eq + Hash> WeightedGraph<N> {
    /// Multi-source Dijkstra. Ties between equal-weight paths are broken by
    /// adjacency iteration order, which is not stable across edge removals.
    pub fn dijkstra(&self, sources: &[N], options: &DijkstraOptions<N>) -> ShortestPaths<N> {
        let max = options.max_cumulative_weight.unwrap_or(f64::INFINITY);
        let mut remaining: Option<HashSet<N>> =
            options.targets.as_ref().map(|t| t.iter().copied().collect());

        let mut distances: HashMap<N, f64> = HashMap::new();
        let mut previous: HashMap<N, N> = HashMap::new();
        let mut settled: HashSet<N> = HashSet::new();
        let mut heap = BinaryHeap::new();

        for &source in sources {
            if self.contains_node(source) {
                distances.insert(source, 0.0);
                heap.push(State { distance: 0.0, node: source });
            }
        }

        while let Some(State { distance, node }) = heap.pop() {
            if !settled.insert(node) {
                continue;
            }

            if let Some(targets) = remaining.as_mut() {
                targets.remove(&node);
                if targets.is_empty() {
                    break;
                }
            }

            for (next, weight) in self.neighbors(node) {
                let candidate = distance + weight;
                if candidate > max || settled.contains(&next) {
                    continue;
                }
                let current = distances.get(&next).copied().unwrap_or(f64::INFINITY);
                if candidate < current {
                    distances.insert(next, candidate);
                    previous.insert(next, node);
                    heap.push(State { distance: candidate, node: next });
                }
            }
        }

        ShortestPaths { distances, previous }
    }

    /// One-to-one shortest path as an ordered node sequence, empty if unreachable.
    pub fn shortest_path(&self, source: N, target: N) -> Vec<N> {
        let options = DijkstraOptions {
            targets: Some(vec![target]),
            max_cumulative_weight: None,
        };
        self.dijkstra(&[source], &options).trace_path(target)
    }

    /// One-to-many distances, pruned at `max_cumulative_weight` when given.
    pub fn distances_from(
        &self,
        sources: &[N],
        max_cumulative_weight: Option<f64>,
    ) -> HashMap<N, f64> {
        let options = DijkstraOptions {
            targets: None,
            max_cumulative_weight,
        };
        self.dijkstra(sources, &options).distances
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Diamond with a cheap and an expensive branch:
    ///   A --1-- B --1-- D
    ///   A --3-- C --3-- D
    fn diamond() -> WeightedGraph<char> {
        let mut g = WeightedGraph::undirected();
        g.add_edge('A', 'B', 1.0);
        g.add_edge('B', 'D', 1.0);
        g.add_edge('A', 'C', 3.0);
        g.add_edge('C', 'D', 3.0);
        g
    }

    #[test]
    fn shortest_path_prefers_lighter_branch() {
        let g = diamond();
        let path = g.shortest_path('A', 'D');
        assert_eq!(path, vec!['A', 'B', 'D']);
        assert_eq!(g.path_weight(&path), Some(2.0));
    }

    #[test]
    fn shortest_path_same_node() {
        let g = diamond();
        assert_eq!(g.shortest_path('C', 'C'), vec!['C']);
    }

    #[test]
    fn unreachable_target_yields_empty_path() {
        let mut g = diamond();
        g.add_node('Z');
        assert!(g.shortest_path('A', 'Z').is_empty());
        assert!(g.shortest_path('A', 'Y').is_empty());
    }

    #[test]
    fn directed_graph_respects_direction() {
        let mut g = WeightedGraph::directed();
        g.add_edge(1u8, 2, 1.0);
        assert_eq!(g.shortest_path(1, 2), vec![1, 2]);
        assert!(g.shortest_path(2, 1).is_empty());
    }

    #[test]
    fn equal_weight_ties_agree_on_total_weight() {
        let mut g = WeightedGraph::undirected();
        g.add_edge(0u8, 1, 1.0);
        g.add_edge(1, 3, 1.0);
        g.add_edge(0, 2, 1.0);
        g.add_edge(2, 3, 1.0);
        let path = g.shortest_path(0, 3);
        assert_eq!(path.len(), 3);
        assert_eq!(g.path_weight(&path), Some(2.0));
    }

    #[test]
    fn bounded_distances_never_exceed_bound() {
        let mut g = WeightedGraph::undirected();
        for i in 0u32..10 {
            g.add_edge(i, i + 1, 1.5);
        }
        let dist = g.distances_from(&[0], Some(5.0));
        assert!(dist.values().all(|d| *d <= 5.0));
        assert_eq!(dist.len(), 4); // 0, 1.5, 3.0, 4.5
        assert_eq!(dist.get(&3), Some(&4.5));
    }

    #[test]
    fn multi_source_takes_closest_source() {
        let mut g = WeightedGraph::undirected();
        g.add_edge(0u8, 1, 10.0);
        g.add_edge(1, 2, 1.0);
        let run = g.dijkstra(&[0, 2], &DijkstraOptions::default());
        assert_eq!(run.distance(1), Some(1.0));
        assert_eq!(run.trace_path(1), vec![2, 1]);
    }
}
