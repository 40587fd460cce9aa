use crate::{AggregateError, FieldMap, NodeFailure, NodePool, Result};
use std::sync::Arc;

#[derive(Clone)]
pub struct UpdateRecordOperation {
    pool: Arc<NodePool>,
}

#[derive(Debug, Clone)]
pub struct UpdateRecordOperationRequest {
    pub table: String,
    pub key: String,
    pub fields: FieldMap,
}

#[derive(Debug, Clone)]
pub enum UpdateRecordOperationOutcome {
    Updated { node_id: String },
    NotFound,
}

impl UpdateRecordOperation {
    pub fn new(pool: Arc<NodePool>) -> Self {
        Self { pool }
    }

    /// Overwrite fields on the first node, in pool order, that holds the key.
    pub async fn run(
        &self,
        request: UpdateRecordOperationRequest,
    ) -> Result<UpdateRecordOperationOutcome> {
        let UpdateRecordOperationRequest { table, key, fields } = request;
        let mut failures = Vec::new();

        for (node_id, store) in self.pool.iter() {
            match store.exists(&key).await {
                Ok(true) => {
                    tracing::debug!(
                        "Updating key {} in table {} on node {}",
                        key,
                        table,
                        node_id
                    );
                    store.set_fields(&key, &fields).await?;
                    return Ok(UpdateRecordOperationOutcome::Updated {
                        node_id: node_id.to_string(),
                    });
                }
                Ok(false) => {}
                Err(error) => failures.push(NodeFailure::new(node_id, error)),
            }
        }

        match AggregateError::new(failures) {
            Some(aggregate) => Err(aggregate.into()),
            None => Ok(UpdateRecordOperationOutcome::NotFound),
        }
    }
}
