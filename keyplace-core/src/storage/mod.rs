//! Storage node backends
//!
//! Every data node is reached through the [`NodeStore`] trait. Records are
//! field maps stored under their key; a per-node sorted set scored by
//! [`index_score`] backs range scans.

pub mod memory;
pub mod redis_store;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

pub use memory::MemoryNodeStore;
pub use redis_store::RedisNodeStore;

/// Field name to value.
pub type FieldMap = HashMap<String, String>;

/// Name of the per-node sorted set holding `(score, key)` index entries.
pub const INDEX_KEY: &str = "_indices";

/// Network location of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEndpoint {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

impl NodeEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            password: None,
        }
    }

    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }
}

/// Operations a coordinator needs from a single storage node.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Set every field of the record, returning how many fields were newly created.
    async fn set_fields(&self, key: &str, fields: &FieldMap) -> Result<usize>;

    /// Fetch every field of the record; empty when the key is absent.
    async fn get_all_fields(&self, key: &str) -> Result<FieldMap>;

    /// Fetch the named fields, omitting those the record does not have.
    async fn get_fields(&self, key: &str, names: &[String]) -> Result<FieldMap>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Remove the record only, leaving the index untouched.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Add or move `key` in the secondary index.
    async fn index_add(&self, score: f64, key: &str) -> Result<()>;

    /// Keys with score >= `min_score` in ascending score order, at most `count`.
    async fn index_range(&self, min_score: f64, count: usize) -> Result<Vec<String>>;

    /// Remove the record together with its index entry under an optimistic
    /// transaction. Returns true only if both removals hit an entry.
    async fn remove_with_index(&self, key: &str) -> Result<bool>;

    /// Number of keys held by the node, index included.
    async fn record_count(&self) -> Result<u64>;

    async fn flush_all(&self) -> Result<()>;

    /// Release connections. Later calls fail with a connection error.
    async fn close(&self) -> Result<()>;
}

/// Score of a key in the secondary index.
///
/// 32-bit FNV-1a reinterpreted as signed, so scores spread over both signs.
/// Only determinism matters; collisions are allowed.
pub fn index_score(key: &str) -> f64 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in key.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    f64::from(hash as i32)
}
