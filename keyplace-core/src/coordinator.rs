//! Benchmark-facing coordinator
//!
//! Every public record operation resolves to a [`Status`]; errors from the
//! nodes or the registry are logged here and never cross this boundary.

use crate::operations::{
    DeleteRecordOperation, DeleteRecordOperationOutcome, DeleteRecordOperationRequest,
    InsertRecordOperation, InsertRecordOperationRequest, ReadObserver, ReadRecordOperation,
    ReadRecordOperationOutcome, ReadRecordOperationRequest, ScanRecordsOperation,
    ScanRecordsOperationRequest, UpdateRecordOperation, UpdateRecordOperationOutcome,
    UpdateRecordOperationRequest,
};
use crate::{
    ClientConfig, FieldMap, NodePool, NodeSelection, PlacementRegistry, RegistryBuilder, Result,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Ok,
    Error,
    NotFound,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Error => "ERROR",
            Status::NotFound => "NOT_FOUND",
        }
    }

    pub fn is_ok(&self) -> bool {
        *self == Status::Ok
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Coordinator {
    pool: Arc<NodePool>,
    registry: Option<Arc<dyn PlacementRegistry>>,
    selection: NodeSelection,
    observer: Option<Arc<dyn ReadObserver>>,
}

impl Coordinator {
    pub fn new(pool: NodePool, selection: NodeSelection) -> Self {
        Self {
            pool: Arc::new(pool),
            registry: None,
            selection,
            observer: None,
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn PlacementRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_read_observer(mut self, observer: Arc<dyn ReadObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Build the node pool and, when configured, connect to the registry.
    pub async fn init(config: &ClientConfig) -> Result<Self> {
        config.validate()?;

        let pool = NodePool::from_config(config)?;
        let mut coordinator = Self::new(pool, config.selection_or_default().into());

        if let Some(registry_config) = &config.registry {
            let registry = RegistryBuilder::from_config(registry_config)
                .timeout(config.timeout())
                .build()
                .await?;
            coordinator = coordinator.with_registry(registry);
        }

        tracing::info!(
            "Coordinator initialized: nodes={:?} selection={:?} registry={}",
            coordinator.pool.ids(),
            coordinator.selection,
            coordinator.registry.is_some()
        );
        Ok(coordinator)
    }

    pub fn pool(&self) -> &NodePool {
        &self.pool
    }

    pub fn selection(&self) -> NodeSelection {
        self.selection
    }

    pub fn has_registry(&self) -> bool {
        self.registry.is_some()
    }

    fn read_operation(&self) -> ReadRecordOperation {
        let operation = ReadRecordOperation::new(self.pool.clone(), self.registry.clone());
        match &self.observer {
            Some(observer) => operation.with_observer(observer.clone()),
            None => operation,
        }
    }

    pub async fn insert(&self, table: &str, key: &str, values: &FieldMap) -> Status {
        let operation =
            InsertRecordOperation::new(self.pool.clone(), self.registry.clone(), self.selection);
        let request = InsertRecordOperationRequest {
            table: table.to_string(),
            key: key.to_string(),
            fields: values.clone(),
        };

        match operation.run(request).await {
            Ok(_) => Status::Ok,
            Err(error) => {
                tracing::warn!("Insert of key {} failed: {}", key, error);
                Status::Error
            }
        }
    }

    /// Read `fields` of `key` (all of them when `None`) into `result`.
    pub async fn read(
        &self,
        table: &str,
        key: &str,
        fields: Option<&[String]>,
        result: &mut FieldMap,
    ) -> Status {
        let request = ReadRecordOperationRequest {
            table: table.to_string(),
            key: key.to_string(),
            fields: fields.map(<[String]>::to_vec),
        };

        match self.read_operation().run(request).await {
            Ok(ReadRecordOperationOutcome::Found(record)) => {
                result.extend(record.fields);
                Status::Ok
            }
            Ok(ReadRecordOperationOutcome::NotFound) => Status::NotFound,
            Err(error) => {
                tracing::warn!("Read of key {} failed: {}", key, error);
                Status::Error
            }
        }
    }

    pub async fn update(&self, table: &str, key: &str, values: &FieldMap) -> Status {
        let operation = UpdateRecordOperation::new(self.pool.clone());
        let request = UpdateRecordOperationRequest {
            table: table.to_string(),
            key: key.to_string(),
            fields: values.clone(),
        };

        match operation.run(request).await {
            Ok(UpdateRecordOperationOutcome::Updated { .. }) => Status::Ok,
            Ok(UpdateRecordOperationOutcome::NotFound) => Status::NotFound,
            Err(error) => {
                tracing::warn!("Update of key {} failed: {}", key, error);
                Status::Error
            }
        }
    }

    /// A key that no node holds is an `Error`, not `NotFound`.
    pub async fn delete(&self, table: &str, key: &str) -> Status {
        let operation = DeleteRecordOperation::new(self.pool.clone(), self.registry.clone());
        let request = DeleteRecordOperationRequest {
            table: table.to_string(),
            key: key.to_string(),
        };

        match operation.run(request).await {
            Ok(DeleteRecordOperationOutcome::Deleted { .. }) => Status::Ok,
            Ok(DeleteRecordOperationOutcome::NotFound) => {
                tracing::debug!("Delete of key {} found no node holding it", key);
                Status::Error
            }
            Err(error) => {
                tracing::warn!("Delete of key {} failed: {}", key, error);
                Status::Error
            }
        }
    }

    pub async fn scan(
        &self,
        table: &str,
        start_key: &str,
        count: usize,
        fields: Option<&[String]>,
        result: &mut Vec<FieldMap>,
    ) -> Status {
        let operation = ScanRecordsOperation::new(self.pool.clone(), self.read_operation());
        let request = ScanRecordsOperationRequest {
            table: table.to_string(),
            start_key: start_key.to_string(),
            count,
            fields: fields.map(<[String]>::to_vec),
        };

        match operation.run(request).await {
            Ok(scanned) => {
                result.extend(scanned.records);
                Status::Ok
            }
            Err(error) => {
                tracing::warn!("Scan from key {} failed: {}", start_key, error);
                Status::Error
            }
        }
    }

    /// Keys held by each node, gathered in parallel.
    pub async fn record_counts(&self) -> Result<BTreeMap<String, u64>> {
        self.pool.record_counts().await.into_result()
    }

    pub async fn flush(&self, and_close: bool) -> Result<()> {
        self.pool.flush_all(and_close).await
    }

    /// Close every node and the registry. Both are attempted even if the
    /// first fails; the node error wins when both fail.
    pub async fn cleanup(&self) -> Result<()> {
        let nodes = self.pool.close_all().await;

        let registry = match &self.registry {
            Some(registry) => registry.close().await,
            None => Ok(()),
        };

        match (nodes, registry) {
            (Err(error), Err(registry_error)) => {
                tracing::warn!("Closing registry failed: {}", registry_error);
                Err(error)
            }
            (Err(error), Ok(())) | (Ok(()), Err(error)) => Err(error),
            (Ok(()), Ok(())) => {
                tracing::info!("Coordinator closed");
                Ok(())
            }
        }
    }
}
