//! Worker threads, their control protocol and the pool managing them.

pub mod message;
pub mod pool;
mod runner;

pub use message::{DataKind, DataPayload, WorkerCommand, WorkerEvent};
pub use pool::{PoolOptions, RefreshReport, WorkerPool};
