use crate::{
    FieldMap, KeyplaceError, NodePool, NodeSelection, PlacementRegistry, Result, index_score,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct InsertRecordOperation {
    pool: Arc<NodePool>,
    registry: Option<Arc<dyn PlacementRegistry>>,
    selection: NodeSelection,
}

#[derive(Debug, Clone)]
pub struct InsertRecordOperationRequest {
    pub table: String,
    pub key: String,
    pub fields: FieldMap,
}

#[derive(Debug, Clone)]
pub struct InsertRecordOperationResult {
    pub node_id: String,
}

impl InsertRecordOperation {
    pub fn new(
        pool: Arc<NodePool>,
        registry: Option<Arc<dyn PlacementRegistry>>,
        selection: NodeSelection,
    ) -> Self {
        Self {
            pool,
            registry,
            selection,
        }
    }

    /// Select, write, confirm with the registry, then index.
    ///
    /// A write the registry does not confirm is removed again before the
    /// error is returned, so no record survives without its placement. The
    /// same holds when indexing fails after confirmation: the placement and
    /// the record are both dropped.
    pub async fn run(
        &self,
        request: InsertRecordOperationRequest,
    ) -> Result<InsertRecordOperationResult> {
        let InsertRecordOperationRequest { table, key, fields } = request;
        if fields.is_empty() {
            return Err(KeyplaceError::EmptyRecord { key });
        }

        let node_id = self
            .selection
            .select_node_for_insert(&self.pool, self.registry.as_deref())
            .await?;
        let store = self
            .pool
            .get(&node_id)
            .ok_or_else(|| KeyplaceError::UnknownNode(node_id.clone()))?;

        tracing::debug!(
            "Inserting key {} into table {} on node {}, num values: {}",
            key,
            table,
            node_id,
            fields.len()
        );

        let written = store.set_fields(&key, &fields).await?;
        if written != fields.len() {
            return Err(KeyplaceError::PartialWrite {
                node_id,
                key,
                written,
                expected: fields.len(),
            });
        }

        if let Some(registry) = &self.registry {
            let confirmed = match registry.insert_tuple(&node_id, &key).await {
                Ok(true) => Ok(()),
                Ok(false) => Err(KeyplaceError::PlacementRejected {
                    node_id: node_id.clone(),
                    key: key.clone(),
                }),
                Err(error) => Err(error),
            };

            if let Err(error) = confirmed {
                tracing::debug!(
                    "Rolling back key {} on node {}: {}",
                    key,
                    node_id,
                    error
                );
                if let Err(rollback_error) = store.remove(&key).await {
                    tracing::warn!(
                        "Rollback of key {} on node {} failed: {}",
                        key,
                        node_id,
                        rollback_error
                    );
                }
                return Err(error);
            }
        }

        if let Err(error) = store.index_add(index_score(&key), &key).await {
            tracing::warn!(
                "Indexing key {} on node {} failed, undoing insert: {}",
                key,
                node_id,
                error
            );
            if let Some(registry) = &self.registry {
                if let Err(undo_error) = registry.delete_tuple(&node_id, &key).await {
                    tracing::warn!(
                        "Dropping placement of key {} on node {} failed: {}",
                        key,
                        node_id,
                        undo_error
                    );
                }
            }
            if let Err(undo_error) = store.remove(&key).await {
                tracing::warn!(
                    "Rollback of key {} on node {} failed: {}",
                    key,
                    node_id,
                    undo_error
                );
            }
            return Err(error);
        }

        Ok(InsertRecordOperationResult { node_id })
    }
}
