use super::{FieldMap, INDEX_KEY, NodeEndpoint, NodeStore};
use crate::{KeyplaceError, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;

enum ConnectionState {
    Idle,
    Open(ConnectionManager),
    Closed,
}

/// A Redis instance used as a data node.
///
/// The shared connection is opened on first use, so an unreachable node only
/// fails the operations that touch it. Transactions get their own connection,
/// opened once and held for the whole WATCH..EXEC span, because WATCH state is
/// per connection and must not leak into the shared one.
pub struct RedisNodeStore {
    client: redis::Client,
    endpoint: NodeEndpoint,
    timeout: Duration,
    state: Mutex<ConnectionState>,
    transaction: Mutex<Option<MultiplexedConnection>>,
}

impl RedisNodeStore {
    pub fn new(endpoint: NodeEndpoint, timeout: Duration) -> Result<Self> {
        let info = redis::ConnectionInfo {
            addr: redis::ConnectionAddr::Tcp(endpoint.host.clone(), endpoint.port),
            redis: redis::RedisConnectionInfo {
                password: endpoint.password.clone(),
                ..Default::default()
            },
        };

        let client = redis::Client::open(info).map_err(|error| {
            KeyplaceError::Config(format!(
                "invalid redis endpoint {}:{}: {}",
                endpoint.host, endpoint.port, error
            ))
        })?;

        Ok(Self {
            client,
            endpoint,
            timeout,
            state: Mutex::new(ConnectionState::Idle),
            transaction: Mutex::new(None),
        })
    }

    pub fn endpoint(&self) -> &NodeEndpoint {
        &self.endpoint
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let mut state = self.state.lock().await;
        match &*state {
            ConnectionState::Open(manager) => return Ok(manager.clone()),
            ConnectionState::Closed => {
                return Err(KeyplaceError::Connection(format!(
                    "connection to {}:{} is closed",
                    self.endpoint.host, self.endpoint.port
                )));
            }
            ConnectionState::Idle => {}
        }

        let manager = match tokio::time::timeout(
            self.timeout,
            ConnectionManager::new(self.client.clone()),
        )
        .await
        {
            Ok(Ok(manager)) => manager,
            Ok(Err(error)) => {
                return Err(KeyplaceError::Connection(format!(
                    "failed to connect to {}:{}: {}",
                    self.endpoint.host, self.endpoint.port, error
                )));
            }
            Err(_) => {
                return Err(KeyplaceError::Timeout(format!(
                    "connect to {}:{}",
                    self.endpoint.host, self.endpoint.port
                )));
            }
        };

        tracing::debug!(
            "Connected to redis node {}:{}",
            self.endpoint.host,
            self.endpoint.port
        );
        *state = ConnectionState::Open(manager.clone());
        Ok(manager)
    }

    async fn open_transaction_connection(&self) -> Result<MultiplexedConnection> {
        match tokio::time::timeout(
            self.timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        {
            Ok(Ok(conn)) => {
                tracing::debug!(
                    "Opened transaction connection to {}:{}",
                    self.endpoint.host,
                    self.endpoint.port
                );
                Ok(conn)
            }
            Ok(Err(error)) => Err(KeyplaceError::Connection(format!(
                "failed to connect to {}:{}: {}",
                self.endpoint.host, self.endpoint.port, error
            ))),
            Err(_) => Err(KeyplaceError::Timeout(format!(
                "connect to {}:{}",
                self.endpoint.host, self.endpoint.port
            ))),
        }
    }

    /// `None` when a concurrent write to `key` aborted the transaction.
    async fn watched_remove(
        &self,
        conn: &mut MultiplexedConnection,
        key: &str,
    ) -> Result<Option<(u64, u64)>> {
        self.timed(
            "WATCH",
            redis::cmd("WATCH").arg(key).query_async::<_, ()>(conn),
        )
        .await?;

        self.timed(
            "MULTI/EXEC",
            redis::pipe()
                .atomic()
                .del(key)
                .zrem(INDEX_KEY, key)
                .query_async(conn),
        )
        .await
    }

    async fn timed<T, F>(&self, op: &str, future: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, future).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(KeyplaceError::Timeout(format!(
                "{} on {}:{}",
                op, self.endpoint.host, self.endpoint.port
            ))),
        }
    }
}

#[async_trait]
impl NodeStore for RedisNodeStore {
    async fn set_fields(&self, key: &str, fields: &FieldMap) -> Result<usize> {
        if fields.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (name, value) in fields {
            cmd.arg(name).arg(value);
        }

        let created: u64 = self.timed("HSET", cmd.query_async(&mut conn)).await?;
        Ok(created as usize)
    }

    async fn get_all_fields(&self, key: &str) -> Result<FieldMap> {
        let mut conn = self.connection().await?;
        self.timed("HGETALL", conn.hgetall(key)).await
    }

    async fn get_fields(&self, key: &str, names: &[String]) -> Result<FieldMap> {
        if names.is_empty() {
            return Ok(FieldMap::new());
        }

        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("HMGET");
        cmd.arg(key);
        for name in names {
            cmd.arg(name);
        }

        let values: Vec<Option<String>> = self.timed("HMGET", cmd.query_async(&mut conn)).await?;
        Ok(names
            .iter()
            .zip(values)
            .filter_map(|(name, value)| value.map(|value| (name.clone(), value)))
            .collect())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        self.timed("EXISTS", conn.exists(key)).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: u64 = self.timed("DEL", conn.del(key)).await?;
        Ok(())
    }

    async fn index_add(&self, score: f64, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: u64 = self.timed("ZADD", conn.zadd(INDEX_KEY, key, score)).await?;
        Ok(())
    }

    async fn index_range(&self, min_score: f64, count: usize) -> Result<Vec<String>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.connection().await?;
        let count = isize::try_from(count).unwrap_or(isize::MAX);
        self.timed(
            "ZRANGEBYSCORE",
            conn.zrangebyscore_limit(INDEX_KEY, min_score, "+inf", 0, count),
        )
        .await
    }

    async fn remove_with_index(&self, key: &str) -> Result<bool> {
        // Refuse to open a fresh connection once the node has been closed.
        self.connection().await?;

        let mut slot = self.transaction.lock().await;
        if slot.is_none() {
            *slot = Some(self.open_transaction_connection().await?);
        }
        let Some(conn) = slot.as_mut() else {
            return Err(KeyplaceError::Internal(
                "transaction connection missing".to_string(),
            ));
        };

        let outcome = self.watched_remove(conn, key).await;
        if outcome.is_err() {
            // A WATCH may still be pending on it.
            *slot = None;
        }

        match outcome? {
            Some((removed_keys, removed_indices)) => Ok(removed_keys > 0 && removed_indices > 0),
            None => {
                tracing::debug!("Transaction on key {} aborted by a concurrent write", key);
                Ok(false)
            }
        }
    }

    async fn record_count(&self) -> Result<u64> {
        let mut conn = self.connection().await?;
        self.timed(
            "DBSIZE",
            redis::cmd("DBSIZE").query_async::<_, u64>(&mut conn),
        )
        .await
    }

    async fn flush_all(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        self.timed(
            "FLUSHALL",
            redis::cmd("FLUSHALL").query_async::<_, ()>(&mut conn),
        )
        .await
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        *state = ConnectionState::Closed;
        self.transaction.lock().await.take();
        tracing::debug!(
            "Closed redis node {}:{}",
            self.endpoint.host,
            self.endpoint.port
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_store_refuses_commands() {
        let store = RedisNodeStore::new(
            NodeEndpoint::new("127.0.0.1", 6379),
            Duration::from_millis(50),
        )
        .unwrap();

        store.close().await.unwrap();
        let err = store.record_count().await.unwrap_err();
        assert!(matches!(err, KeyplaceError::Connection(_)));
    }

    #[tokio::test]
    async fn test_closed_store_refuses_transactions() {
        let store = RedisNodeStore::new(
            NodeEndpoint::new("127.0.0.1", 1),
            Duration::from_millis(200),
        )
        .unwrap();

        store.close().await.unwrap();
        let err = store.remove_with_index("k").await.unwrap_err();
        assert!(matches!(err, KeyplaceError::Connection(_)));
        assert!(store.transaction.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_store_keeps_no_transaction_connection() {
        let store = RedisNodeStore::new(
            NodeEndpoint::new("127.0.0.1", 1),
            Duration::from_millis(200),
        )
        .unwrap();

        assert!(store.remove_with_index("k").await.is_err());
        assert!(store.transaction.lock().await.is_none());
        assert!(store.remove_with_index("k").await.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_node_fails_lazily() {
        // Port 1 is reserved and nothing listens there in test environments.
        let store = RedisNodeStore::new(
            NodeEndpoint::new("127.0.0.1", 1),
            Duration::from_millis(200),
        )
        .unwrap();

        let err = store.exists("k").await.unwrap_err();
        assert!(matches!(
            err,
            KeyplaceError::Connection(_) | KeyplaceError::Timeout(_)
        ));
    }
}
