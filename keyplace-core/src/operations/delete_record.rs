use crate::{AggregateError, NodeFailure, NodePool, PlacementRegistry, Result};
use std::sync::Arc;

#[derive(Clone)]
pub struct DeleteRecordOperation {
    pool: Arc<NodePool>,
    registry: Option<Arc<dyn PlacementRegistry>>,
}

#[derive(Debug, Clone)]
pub struct DeleteRecordOperationRequest {
    pub table: String,
    pub key: String,
}

#[derive(Debug, Clone)]
pub enum DeleteRecordOperationOutcome {
    Deleted { node_id: String },
    NotFound,
}

impl DeleteRecordOperation {
    pub fn new(pool: Arc<NodePool>, registry: Option<Arc<dyn PlacementRegistry>>) -> Self {
        Self { pool, registry }
    }

    /// Remove the record and its index entry from the first node that holds
    /// both, then drop the placement from the registry.
    pub async fn run(
        &self,
        request: DeleteRecordOperationRequest,
    ) -> Result<DeleteRecordOperationOutcome> {
        let DeleteRecordOperationRequest { table, key } = request;
        let mut failures = Vec::new();
        let mut deleted_on = None;

        for (node_id, store) in self.pool.iter() {
            match store.remove_with_index(&key).await {
                Ok(true) => {
                    deleted_on = Some(node_id.to_string());
                    break;
                }
                Ok(false) => {}
                Err(error) => failures.push(NodeFailure::new(node_id, error)),
            }
        }

        let Some(node_id) = deleted_on else {
            return match AggregateError::new(failures) {
                Some(aggregate) => Err(aggregate.into()),
                None => Ok(DeleteRecordOperationOutcome::NotFound),
            };
        };

        tracing::debug!("Deleted key {} of table {} on node {}", key, table, node_id);

        if let Some(registry) = &self.registry {
            if !registry.delete_tuple(&node_id, &key).await? {
                tracing::warn!(
                    "Registry had no placement of key {} on node {}",
                    key,
                    node_id
                );
            }
        }

        Ok(DeleteRecordOperationOutcome::Deleted { node_id })
    }
}
