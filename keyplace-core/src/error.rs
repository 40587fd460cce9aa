use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeyplaceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("Registry rejected placement of key {key} on node {node_id}")]
    PlacementRejected { node_id: String, key: String },

    #[error("Partial write of key {key} on node {node_id}: {written} of {expected} fields")]
    PartialWrite {
        node_id: String,
        key: String,
        written: usize,
        expected: usize,
    },

    #[error("Record {key} has no fields")]
    EmptyRecord { key: String },

    #[error("No nodes available for placement")]
    NoNodesAvailable,

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Aggregate(AggregateError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, KeyplaceError>;

/// A failure observed on one node during a fan-out.
#[derive(Debug)]
pub struct NodeFailure {
    pub node_id: String,
    pub error: KeyplaceError,
}

impl NodeFailure {
    pub fn new(node_id: impl Into<String>, error: KeyplaceError) -> Self {
        Self {
            node_id: node_id.into(),
            error,
        }
    }
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {}: {}", self.node_id, self.error)
    }
}

/// Per-node causes collected from a fan-out, in the order they were observed.
///
/// Never empty: the only constructor returns `None` for an empty list. The
/// first cause is the primary one and doubles as the `source()`.
#[derive(Debug)]
pub struct AggregateError {
    causes: Vec<NodeFailure>,
}

impl AggregateError {
    pub fn new(causes: Vec<NodeFailure>) -> Option<Self> {
        if causes.is_empty() {
            None
        } else {
            Some(Self { causes })
        }
    }

    pub fn primary(&self) -> &NodeFailure {
        &self.causes[0]
    }

    pub fn causes(&self) -> &[NodeFailure] {
        &self.causes
    }

    pub fn into_causes(self) -> Vec<NodeFailure> {
        self.causes
    }

    pub fn node_ids(&self) -> Vec<&str> {
        self.causes
            .iter()
            .map(|cause| cause.node_id.as_str())
            .collect()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, cause) in self.causes.iter().enumerate() {
            if index > 0 {
                f.write_str(";\n")?;
            }
            write!(f, "{}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.primary().error)
    }
}

impl From<AggregateError> for KeyplaceError {
    fn from(error: AggregateError) -> Self {
        KeyplaceError::Aggregate(error)
    }
}
