//! Keyplace Core - client library for benchmarking independent KV nodes
//!
//! Records are spread over a pool of standalone Redis nodes:
//! - a selection policy picks the node for every new record
//! - an optional placement registry confirms and locates placements
//! - a per-node sorted-set index backs range scans
//! - pool-wide maintenance fans out in parallel and aggregates failures

pub mod config;
pub mod coordinator;
pub mod error;
pub mod operations;
pub mod pool;
pub mod registry;
pub mod selection;
pub mod storage;

#[cfg(test)]
mod testing;

pub use config::{ClientConfig, NodeConfig, RegistryConfig, SelectionKind};
pub use coordinator::{Coordinator, Status};
pub use error::{AggregateError, KeyplaceError, NodeFailure, Result};
pub use operations::ReadObserver;
pub use pool::{FanOut, Node, NodePool};
pub use registry::{PlacementRegistry, RegistryBuilder, RegistryClient, TupleLocation};
pub use selection::{NodeSelection, pick_least_loaded};
pub use storage::{
    FieldMap, INDEX_KEY, MemoryNodeStore, NodeEndpoint, NodeStore, RedisNodeStore, index_score,
};
