use crate::config::ClientConfig;
use crate::error::{AggregateError, NodeFailure};
use crate::storage::{NodeEndpoint, NodeStore, RedisNodeStore};
use crate::{KeyplaceError, Result};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// One data node of the pool.
pub struct Node {
    pub node_id: String,
    pub endpoint: Option<NodeEndpoint>,
    store: Arc<dyn NodeStore>,
}

impl Node {
    pub fn store(&self) -> Arc<dyn NodeStore> {
        self.store.clone()
    }
}

/// Successful per-node results plus the failures of a fan-out.
#[derive(Debug)]
pub struct FanOut<T> {
    pub results: BTreeMap<String, T>,
    pub failures: Vec<NodeFailure>,
}

impl<T> FanOut<T> {
    /// All results, or an aggregate of every failure if any node failed.
    pub fn into_result(self) -> Result<BTreeMap<String, T>> {
        match AggregateError::new(self.failures) {
            Some(aggregate) => Err(aggregate.into()),
            None => Ok(self.results),
        }
    }
}

/// The data nodes, keyed by node id.
///
/// Iteration follows node id order, which keeps fan-outs and tie-breaks
/// deterministic. Stores are handed out as shared handles that callers drop
/// at the end of an operation.
pub struct NodePool {
    nodes: BTreeMap<String, Node>,
    timeout: Duration,
}

impl NodePool {
    pub fn new(timeout: Duration) -> Self {
        Self {
            nodes: BTreeMap::new(),
            timeout,
        }
    }

    /// Build the pool from the default nodes of a validated configuration.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let mut pool = Self::new(config.timeout());
        for node in config.default_nodes() {
            let endpoint = NodeEndpoint::new(node.host.clone(), node.port)
                .with_password(node.password.clone());
            pool.add(&node.id, endpoint)?;
        }

        if pool.is_empty() {
            return Err(KeyplaceError::Config(
                "data nodes are not specified".to_string(),
            ));
        }
        Ok(pool)
    }

    /// Register a Redis node.
    pub fn add(&mut self, node_id: &str, endpoint: NodeEndpoint) -> Result<()> {
        let store = RedisNodeStore::new(endpoint.clone(), self.timeout)?;
        self.insert(node_id, Some(endpoint), Arc::new(store))
    }

    /// Register a node backed by an arbitrary store.
    pub fn add_store(&mut self, node_id: &str, store: Arc<dyn NodeStore>) -> Result<()> {
        self.insert(node_id, None, store)
    }

    fn insert(
        &mut self,
        node_id: &str,
        endpoint: Option<NodeEndpoint>,
        store: Arc<dyn NodeStore>,
    ) -> Result<()> {
        if node_id.trim().is_empty() {
            return Err(KeyplaceError::Config("node id cannot be empty".to_string()));
        }
        if self.nodes.contains_key(node_id) {
            return Err(KeyplaceError::Config(format!(
                "duplicate node id: {}",
                node_id
            )));
        }

        self.nodes.insert(
            node_id.to_string(),
            Node {
                node_id: node_id.to_string(),
                endpoint,
                store,
            },
        );
        Ok(())
    }

    pub fn get(&self, node_id: &str) -> Option<Arc<dyn NodeStore>> {
        self.nodes.get(node_id).map(Node::store)
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in iteration order, for sequential walks.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Arc<dyn NodeStore>)> + '_ {
        self.nodes
            .iter()
            .map(|(node_id, node)| (node_id.as_str(), node.store()))
    }

    /// Run `op` against every node concurrently, one task per node.
    ///
    /// A failing node never cancels the others; every failure is collected
    /// and returned next to the successful results.
    pub async fn for_each_parallel<T, F, Fut>(&self, op: F) -> FanOut<T>
    where
        T: Send + 'static,
        F: Fn(String, Arc<dyn NodeStore>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let tasks: Vec<(String, tokio::task::JoinHandle<Result<T>>)> = self
            .nodes
            .iter()
            .map(|(node_id, node)| {
                let task = tokio::spawn(op(node_id.clone(), node.store()));
                (node_id.clone(), task)
            })
            .collect();

        let (node_ids, handles): (Vec<String>, Vec<_>) = tasks.into_iter().unzip();
        let joined = futures_util::future::join_all(handles).await;

        let mut fan_out = FanOut {
            results: BTreeMap::new(),
            failures: Vec::new(),
        };
        for (node_id, joined) in node_ids.into_iter().zip(joined) {
            match joined {
                Ok(Ok(value)) => {
                    fan_out.results.insert(node_id, value);
                }
                Ok(Err(error)) => fan_out.failures.push(NodeFailure::new(node_id, error)),
                Err(join_error) => fan_out.failures.push(NodeFailure::new(
                    node_id,
                    KeyplaceError::Internal(format!("node task failed: {}", join_error)),
                )),
            }
        }
        fan_out
    }

    /// Number of keys held by each node.
    pub async fn record_counts(&self) -> FanOut<u64> {
        self.for_each_parallel(|_, store| async move { store.record_count().await })
            .await
    }

    /// Close every node, reporting all failures together.
    pub async fn close_all(&self) -> Result<()> {
        let fan_out = self
            .for_each_parallel(|_, store| async move { store.close().await })
            .await;
        for failure in &fan_out.failures {
            tracing::warn!(
                "Closing connection failed for node {}: {}",
                failure.node_id,
                failure.error
            );
        }
        fan_out.into_result().map(|_| ())
    }

    /// Drop every key on every node, optionally closing the nodes afterwards.
    pub async fn flush_all(&self, and_close: bool) -> Result<()> {
        let fan_out = self
            .for_each_parallel(move |_, store| async move {
                store.flush_all().await?;
                if and_close {
                    store.close().await?;
                }
                Result::<()>::Ok(())
            })
            .await;
        for failure in &fan_out.failures {
            tracing::warn!(
                "Flushing failed for node {}: {}",
                failure.node_id,
                failure.error
            );
        }
        fan_out.into_result().map(|_| ())
    }
}
