use thiserror::Error;
use wayfarer_core::{Coords, SectionId};

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Point ({}, {}) is farther than {max_dist} from every section", .coords.x, .coords.y)]
    UnapproachablePoint { coords: Coords, max_dist: f64 },

    #[error("Unknown section: {0}")]
    UnknownSection(SectionId),

    #[error("No path between {from} and {to}")]
    NoPath { from: String, to: String },
}
