use crate::{
    AggregateError, FieldMap, KeyplaceError, NodeFailure, NodePool, NodeStore, PlacementRegistry,
    Result,
};
use std::sync::Arc;

/// Receives the result of every read, e.g. to feed an external tracker.
pub trait ReadObserver: Send + Sync {
    fn on_read(&self, node_id: Option<&str>, key: &str, found: bool);
}

#[derive(Clone)]
pub struct ReadRecordOperation {
    pool: Arc<NodePool>,
    registry: Option<Arc<dyn PlacementRegistry>>,
    observer: Option<Arc<dyn ReadObserver>>,
}

#[derive(Debug, Clone)]
pub struct ReadRecordOperationRequest {
    pub table: String,
    pub key: String,
    /// Fields to fetch. `None` or an empty list reads every field.
    pub fields: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct ReadRecordOperationResult {
    pub node_id: String,
    pub fields: FieldMap,
}

#[derive(Debug, Clone)]
pub enum ReadRecordOperationOutcome {
    Found(ReadRecordOperationResult),
    NotFound,
}

impl ReadRecordOperation {
    pub fn new(pool: Arc<NodePool>, registry: Option<Arc<dyn PlacementRegistry>>) -> Self {
        Self {
            pool,
            registry,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ReadObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub async fn run(
        &self,
        request: ReadRecordOperationRequest,
    ) -> Result<ReadRecordOperationOutcome> {
        let ReadRecordOperationRequest { table, key, fields } = request;
        let fields = fields.filter(|names| !names.is_empty());

        tracing::debug!("Reading key {} from table {}", key, table);

        let outcome = match &self.registry {
            Some(registry) => self.read_located(registry.as_ref(), &key, fields.as_deref()).await,
            None => self.read_any(&key, fields.as_deref()).await,
        };

        if let Some(observer) = &self.observer {
            match &outcome {
                Ok(ReadRecordOperationOutcome::Found(result)) => {
                    observer.on_read(Some(result.node_id.as_str()), &key, true)
                }
                _ => observer.on_read(None, &key, false),
            }
        }
        outcome
    }

    /// Ask the registry for the owner, read from it, then hand the capacity back.
    async fn read_located(
        &self,
        registry: &dyn PlacementRegistry,
        key: &str,
        fields: Option<&[String]>,
    ) -> Result<ReadRecordOperationOutcome> {
        let Some(location) = registry.locate_tuple(key).await? else {
            return Ok(ReadRecordOperationOutcome::NotFound);
        };

        let fetched = if location.exists {
            match self.pool.get(&location.node_id) {
                Some(store) => fetch(store.as_ref(), key, fields).await,
                None => Err(KeyplaceError::UnknownNode(location.node_id.clone())),
            }
        } else {
            Ok(FieldMap::new())
        };

        // Released whatever the fetch did.
        let released = registry.release_capacity(&location.node_id).await;

        let record = match (fetched, released) {
            (Ok(record), Ok(())) => record,
            (Ok(_), Err(error)) => return Err(error),
            (Err(error), released) => {
                if let Err(release_error) = released {
                    tracing::warn!(
                        "Failed releasing capacity of node {}: {}",
                        location.node_id,
                        release_error
                    );
                }
                return Err(error);
            }
        };

        if record.is_empty() {
            return Ok(ReadRecordOperationOutcome::NotFound);
        }
        Ok(ReadRecordOperationOutcome::Found(ReadRecordOperationResult {
            node_id: location.node_id,
            fields: record,
        }))
    }

    /// Walk the pool in order until some node returns a non-empty record.
    async fn read_any(
        &self,
        key: &str,
        fields: Option<&[String]>,
    ) -> Result<ReadRecordOperationOutcome> {
        let mut failures = Vec::new();

        for (node_id, store) in self.pool.iter() {
            match fetch(store.as_ref(), key, fields).await {
                Ok(record) if !record.is_empty() => {
                    return Ok(ReadRecordOperationOutcome::Found(ReadRecordOperationResult {
                        node_id: node_id.to_string(),
                        fields: record,
                    }));
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::debug!("Read of key {} failed on node {}: {}", key, node_id, error);
                    failures.push(NodeFailure::new(node_id, error));
                }
            }
        }

        match AggregateError::new(failures) {
            Some(aggregate) => Err(aggregate.into()),
            None => Ok(ReadRecordOperationOutcome::NotFound),
        }
    }
}

async fn fetch(store: &dyn NodeStore, key: &str, fields: Option<&[String]>) -> Result<FieldMap> {
    match fields {
        Some(names) => store.get_fields(key, names).await,
        None => store.get_all_fields(key).await,
    }
}
