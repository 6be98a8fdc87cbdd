pub mod config;
pub mod entity;
pub mod error;
pub mod geometry;
pub mod store;

pub use config::Config;
pub use entity::*;
pub use error::*;
pub use geometry::{Coords, Segment};
pub use store::{Dataset, MemoryStore, ResultStore, SourceStore};
