//! Weighted graphs and the walking-graph engine built on top of them.

pub mod dijkstra;
pub mod error;
pub mod foot;
pub mod weighted;

pub use dijkstra::{DijkstraOptions, ShortestPaths};
pub use error::GraphError;
pub use foot::{
    ApproachedPoint, FootGraph, FootGraphEngine, FootGraphExport, FootPath, Insertion, StopDistances,
};
pub use weighted::{GraphExport, WeightedGraph};
