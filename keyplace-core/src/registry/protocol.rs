use super::TupleLocation;
use crate::{KeyplaceError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "args", rename_all = "snake_case")]
pub enum RegistryCommand {
    InsertTuple { node_id: String, tuple_id: String },
    DeleteTuple { node_id: String, tuple_id: String },
    LocateTuple { tuple_id: String },
    ReleaseCapacity { node_id: String },
    SuggestNode { nodes: Vec<String> },
}

impl RegistryCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::InsertTuple { .. } => "insert_tuple",
            Self::DeleteTuple { .. } => "delete_tuple",
            Self::LocateTuple { .. } => "locate_tuple",
            Self::ReleaseCapacity { .. } => "release_capacity",
            Self::SuggestNode { .. } => "suggest_node",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub version: u32,
    #[serde(flatten)]
    pub command: RegistryCommand,
}

impl CommandEnvelope {
    pub fn new(command: RegistryCommand) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            command,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope<T> {
    pub success: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
}

impl<T: DeserializeOwned> ResultEnvelope<T> {
    pub fn from_bytes(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|error| {
            KeyplaceError::Protocol(format!("malformed registry response: {}", error))
        })
    }

    /// Unwrap a successful envelope. A `success: false` answer means the
    /// registry could not serve the command.
    pub fn into_result(self, op: &str) -> Result<Option<T>> {
        if !self.success {
            return Err(KeyplaceError::RegistryUnavailable(format!(
                "{} failed: {}",
                op,
                self.error.as_deref().unwrap_or("no error message")
            )));
        }
        Ok(self.result)
    }
}

/// Result payload of `locate_tuple`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocateResult {
    pub node_id: Option<String>,
    #[serde(default)]
    pub exists: bool,
}

impl LocateResult {
    pub fn into_location(self) -> Option<TupleLocation> {
        self.node_id.map(|node_id| TupleLocation {
            node_id,
            exists: self.exists,
        })
    }
}
