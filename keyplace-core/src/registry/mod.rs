//! Placement registry
//!
//! The registry is the authority on which node owns which key. It is reached
//! over two long-lived framed TCP connections: the control channel records
//! placements, the benchmark channel answers lookups and capacity releases.

pub mod client;
pub mod factory;
pub mod protocol;
pub mod wire;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use client::RegistryClient;
pub use factory::RegistryBuilder;
pub use protocol::{CommandEnvelope, PROTOCOL_VERSION, RegistryCommand, ResultEnvelope};
pub use wire::{MAX_FRAME_LEN, WireClient, encode_frame, read_frame, write_frame};

/// Where the registry believes a key lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TupleLocation {
    pub node_id: String,
    pub exists: bool,
}

/// Typed placement operations.
#[async_trait]
pub trait PlacementRegistry: Send + Sync {
    /// Record that `key` now lives on `node_id`. False means the registry declined.
    async fn insert_tuple(&self, node_id: &str, key: &str) -> Result<bool>;

    /// Forget the placement of `key` on `node_id`.
    async fn delete_tuple(&self, node_id: &str, key: &str) -> Result<bool>;

    /// Find the owner of `key`; `None` when the registry has never heard of it.
    async fn locate_tuple(&self, key: &str) -> Result<Option<TupleLocation>>;

    /// Return read capacity taken by a preceding lookup.
    async fn release_capacity(&self, node_id: &str) -> Result<()>;

    /// Ask the registry which of `candidates` should receive the next record.
    async fn suggest_node(&self, candidates: &[String]) -> Result<String>;

    /// Close the underlying connections.
    async fn close(&self) -> Result<()>;
}
