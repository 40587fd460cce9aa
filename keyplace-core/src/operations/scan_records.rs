use crate::operations::read_record::{
    ReadRecordOperation, ReadRecordOperationOutcome, ReadRecordOperationRequest,
};
use crate::{AggregateError, FieldMap, NodeFailure, NodePool, Result, index_score};
use std::sync::Arc;

#[derive(Clone)]
pub struct ScanRecordsOperation {
    pool: Arc<NodePool>,
    read: ReadRecordOperation,
}

#[derive(Debug, Clone)]
pub struct ScanRecordsOperationRequest {
    pub table: String,
    pub start_key: String,
    /// Per-node cap on the number of index entries visited.
    pub count: usize,
    pub fields: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct ScanRecordsOperationResult {
    pub records: Vec<FieldMap>,
}

impl ScanRecordsOperation {
    /// `read` fetches each indexed key, so scans honor the same placement
    /// lookups and read notifications as point reads.
    pub fn new(pool: Arc<NodePool>, read: ReadRecordOperation) -> Self {
        Self { pool, read }
    }

    /// Walk each node's index from the score of `start_key` upward and read
    /// every key it yields. Records come back grouped by node, in pool order;
    /// there is no global ordering across nodes.
    ///
    /// A failing node does not stop the walk. Once every node was visited, any
    /// failure turns the scan into an aggregate error naming those nodes.
    pub async fn run(
        &self,
        request: ScanRecordsOperationRequest,
    ) -> Result<ScanRecordsOperationResult> {
        let ScanRecordsOperationRequest {
            table,
            start_key,
            count,
            fields,
        } = request;
        let min_score = index_score(&start_key);
        let mut records = Vec::new();
        let mut failures = Vec::new();

        for (node_id, store) in self.pool.iter() {
            let keys = match store.index_range(min_score, count).await {
                Ok(keys) => keys,
                Err(error) => {
                    tracing::warn!("Scan of node {} failed: {}", node_id, error);
                    failures.push(NodeFailure::new(node_id, error));
                    continue;
                }
            };
            tracing::debug!(
                "Scanning {} keys of table {} on node {} from {}",
                keys.len(),
                table,
                node_id,
                start_key
            );

            for key in keys {
                let request = ReadRecordOperationRequest {
                    table: table.clone(),
                    key,
                    fields: fields.clone(),
                };
                match self.read.run(request).await {
                    Ok(ReadRecordOperationOutcome::Found(result)) => records.push(result.fields),
                    Ok(ReadRecordOperationOutcome::NotFound) => {}
                    Err(error) => {
                        failures.push(NodeFailure::new(node_id, error));
                        break;
                    }
                }
            }
        }

        match AggregateError::new(failures) {
            Some(aggregate) => Err(aggregate.into()),
            None => Ok(ScanRecordsOperationResult { records }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{KeyplaceError, MemoryNodeStore, NodeStore, ReadObserver};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct KeyLog {
        keys: Mutex<Vec<String>>,
    }

    impl ReadObserver for KeyLog {
        fn on_read(&self, _node_id: Option<&str>, key: &str, _found: bool) {
            self.keys.lock().unwrap().push(key.to_string());
        }
    }

    async fn put(store: &MemoryNodeStore, score: f64, key: &str) {
        let record = FieldMap::from([("key".to_string(), key.to_string())]);
        store.set_fields(key, &record).await.unwrap();
        store.index_add(score, key).await.unwrap();
    }

    fn request(start_key: &str, count: usize) -> ScanRecordsOperationRequest {
        ScanRecordsOperationRequest {
            table: "usertable".to_string(),
            start_key: start_key.to_string(),
            count,
            fields: None,
        }
    }

    fn scan_operation(pool: NodePool) -> ScanRecordsOperation {
        let pool = Arc::new(pool);
        ScanRecordsOperation::new(pool.clone(), ReadRecordOperation::new(pool, None))
    }

    fn keys_of(result: &ScanRecordsOperationResult) -> Vec<String> {
        result
            .records
            .iter()
            .map(|record| record["key"].clone())
            .collect()
    }

    #[tokio::test]
    async fn test_scan_concatenates_nodes_in_pool_order() {
        let start = "user1";
        let base = index_score(start);

        let a = Arc::new(MemoryNodeStore::new());
        put(&a, base + 1.0, "a-1").await;
        put(&a, base - 1.0, "a-below").await;
        let b = Arc::new(MemoryNodeStore::new());
        put(&b, base, "b-0").await;
        put(&b, base + 2.0, "b-2").await;
        put(&b, base + 3.0, "b-3").await;

        let mut pool = NodePool::new(Duration::from_secs(1));
        pool.add_store("a", a).unwrap();
        pool.add_store("b", b).unwrap();
        let operation = scan_operation(pool);

        let result = operation.run(request(start, 2)).await.unwrap();
        assert_eq!(keys_of(&result), vec!["a-1", "b-0", "b-2"]);
    }

    #[tokio::test]
    async fn test_scan_skips_indexed_keys_without_record() {
        let store = Arc::new(MemoryNodeStore::new());
        put(&store, index_score("k1"), "k1").await;
        store.index_add(index_score("k1") + 1.0, "ghost").await.unwrap();

        let mut pool = NodePool::new(Duration::from_secs(1));
        pool.add_store("a", store).unwrap();
        let operation = scan_operation(pool);

        let result = operation.run(request("k1", 10)).await.unwrap();
        assert_eq!(keys_of(&result), vec!["k1"]);
    }

    #[tokio::test]
    async fn test_scan_visits_every_node_past_a_dead_one() {
        let dead = Arc::new(MemoryNodeStore::new());
        dead.set_unreachable(true);
        let live = Arc::new(MemoryNodeStore::new());
        put(&live, index_score("k1"), "k1").await;

        let mut pool = NodePool::new(Duration::from_secs(1));
        pool.add_store("a", dead.clone()).unwrap();
        pool.add_store("b", live).unwrap();
        let pool = Arc::new(pool);
        let observer = Arc::new(KeyLog::default());
        let read = ReadRecordOperation::new(pool.clone(), None).with_observer(observer.clone());
        let operation = ScanRecordsOperation::new(pool, read);

        let err = operation.run(request("k1", 10)).await.unwrap_err();
        let KeyplaceError::Aggregate(aggregate) = err else {
            panic!("expected aggregate error, got {:?}", err);
        };
        assert_eq!(aggregate.node_ids(), vec!["a"]);
        assert!(matches!(
            aggregate.primary().error,
            KeyplaceError::Connection(_)
        ));
        // Node b was still scanned and its key read.
        assert_eq!(*observer.keys.lock().unwrap(), vec!["k1".to_string()]);

        dead.set_unreachable(false);
        let result = operation.run(request("k1", 10)).await.unwrap();
        assert_eq!(keys_of(&result), vec!["k1"]);
    }
}
