use super::protocol::{CommandEnvelope, LocateResult, RegistryCommand, ResultEnvelope};
use super::{PlacementRegistry, TupleLocation, WireClient};
use crate::{KeyplaceError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;

/// Placement client speaking the JSON command envelope over two framed
/// connections: `control` for tuple writes, `benchmark` for lookups.
pub struct RegistryClient {
    control: WireClient,
    benchmark: WireClient,
}

impl RegistryClient {
    pub fn new(control: WireClient, benchmark: WireClient) -> Self {
        Self { control, benchmark }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        channel: &WireClient,
        command: RegistryCommand,
    ) -> Result<Option<T>> {
        let op = command.name();
        let payload = CommandEnvelope::new(command).to_bytes()?;

        let response = channel.send(&payload).await.map_err(|error| match error {
            KeyplaceError::Protocol(_) => error,
            other => KeyplaceError::RegistryUnavailable(format!(
                "{} via {}: {}",
                op,
                channel.addr(),
                other
            )),
        })?;

        ResultEnvelope::<T>::from_bytes(&response)?.into_result(op)
    }
}

#[async_trait]
impl PlacementRegistry for RegistryClient {
    async fn insert_tuple(&self, node_id: &str, key: &str) -> Result<bool> {
        let accepted = self
            .call::<bool>(
                &self.control,
                RegistryCommand::InsertTuple {
                    node_id: node_id.to_string(),
                    tuple_id: key.to_string(),
                },
            )
            .await?
            .unwrap_or(false);

        tracing::debug!(
            "Confirm insertion of key {} to node {}: {}",
            key,
            node_id,
            accepted
        );
        Ok(accepted)
    }

    async fn delete_tuple(&self, node_id: &str, key: &str) -> Result<bool> {
        Ok(self
            .call::<bool>(
                &self.control,
                RegistryCommand::DeleteTuple {
                    node_id: node_id.to_string(),
                    tuple_id: key.to_string(),
                },
            )
            .await?
            .unwrap_or(false))
    }

    async fn locate_tuple(&self, key: &str) -> Result<Option<TupleLocation>> {
        let located = self
            .call::<LocateResult>(
                &self.benchmark,
                RegistryCommand::LocateTuple {
                    tuple_id: key.to_string(),
                },
            )
            .await?;

        Ok(located.and_then(LocateResult::into_location))
    }

    async fn release_capacity(&self, node_id: &str) -> Result<()> {
        self.call::<serde_json::Value>(
            &self.benchmark,
            RegistryCommand::ReleaseCapacity {
                node_id: node_id.to_string(),
            },
        )
        .await?;
        Ok(())
    }

    async fn suggest_node(&self, candidates: &[String]) -> Result<String> {
        self.call::<String>(
            &self.control,
            RegistryCommand::SuggestNode {
                nodes: candidates.to_vec(),
            },
        )
        .await?
        .ok_or_else(|| {
            KeyplaceError::RegistryUnavailable("suggest_node returned no node".to_string())
        })
    }

    async fn close(&self) -> Result<()> {
        let control = self.control.close().await;
        let benchmark = self.benchmark.close().await;
        control.and(benchmark)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{read_frame, write_frame};
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// Serves `rounds` requests on one connection, answering each through `reply`.
    async fn fake_channel<F>(
        rounds: usize,
        reply: F,
    ) -> (u16, tokio::task::JoinHandle<Vec<serde_json::Value>>)
    where
        F: Fn(&serde_json::Value) -> serde_json::Value + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            for _ in 0..rounds {
                let request: serde_json::Value =
                    serde_json::from_slice(&read_frame(&mut socket).await.unwrap()).unwrap();
                let response = reply(&request);
                write_frame(&mut socket, &serde_json::to_vec(&response).unwrap())
                    .await
                    .unwrap();
                seen.push(request);
            }
            seen
        });
        (port, handle)
    }

    async fn connect(port: u16) -> WireClient {
        WireClient::connect("127.0.0.1", port, Duration::from_secs(5))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_locate_use_their_channels() {
        let (control_port, control) = fake_channel(2, |request| {
            let accepted = request["args"]["node_id"] == "a";
            serde_json::json!({"success": true, "result": accepted})
        })
        .await;
        let (bench_port, bench) = fake_channel(3, |request| match request["op"].as_str() {
            Some("locate_tuple") if request["args"]["tuple_id"] == "user1" => {
                serde_json::json!({"success": true, "result": {"node_id": "a", "exists": true}})
            }
            Some("locate_tuple") => {
                serde_json::json!({"success": true, "result": {"node_id": null, "exists": false}})
            }
            _ => serde_json::json!({"success": true, "result": null}),
        })
        .await;

        let client = RegistryClient::new(connect(control_port).await, connect(bench_port).await);

        assert!(client.insert_tuple("a", "user1").await.unwrap());
        assert!(!client.insert_tuple("b", "user2").await.unwrap());
        assert_eq!(
            client.locate_tuple("user1").await.unwrap(),
            Some(TupleLocation {
                node_id: "a".to_string(),
                exists: true
            })
        );
        assert_eq!(client.locate_tuple("user9").await.unwrap(), None);
        client.release_capacity("a").await.unwrap();

        let control_seen = control.await.unwrap();
        assert_eq!(control_seen[0]["op"], "insert_tuple");
        assert_eq!(control_seen[0]["version"], 1);
        assert_eq!(control_seen[1]["args"]["tuple_id"], "user2");

        let bench_seen = bench.await.unwrap();
        assert_eq!(bench_seen[2]["op"], "release_capacity");
        assert_eq!(bench_seen[2]["args"]["node_id"], "a");

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_unsuccessful_response_surfaces_registry_unavailable() {
        let (control_port, control) = fake_channel(1, |_| {
            serde_json::json!({"success": false, "error": "registry is read-only"})
        })
        .await;
        let (bench_port, _bench) = fake_channel(0, |_| serde_json::Value::Null).await;

        let client = RegistryClient::new(connect(control_port).await, connect(bench_port).await);
        let err = client.insert_tuple("a", "user1").await.unwrap_err();
        assert!(matches!(err, KeyplaceError::RegistryUnavailable(_)));
        control.await.unwrap();
    }

    #[tokio::test]
    async fn test_dead_channel_surfaces_registry_unavailable() {
        let (control_port, control) = fake_channel(0, |_| serde_json::Value::Null).await;
        let (bench_port, bench) = fake_channel(0, |_| serde_json::Value::Null).await;

        let client = RegistryClient::new(connect(control_port).await, connect(bench_port).await);
        control.await.unwrap();
        bench.await.unwrap();

        // The fake servers have hung up; the first call notices and drops the
        // stream, the second finds it closed.
        assert!(client.locate_tuple("k").await.is_err());
        let err = client.locate_tuple("k").await.unwrap_err();
        assert!(matches!(err, KeyplaceError::RegistryUnavailable(_)));
    }

    #[tokio::test]
    async fn test_suggest_node() {
        let (control_port, control) = fake_channel(1, |request| {
            let last = request["args"]["nodes"].as_array().unwrap().last().cloned();
            serde_json::json!({"success": true, "result": last})
        })
        .await;
        let (bench_port, _bench) = fake_channel(0, |_| serde_json::Value::Null).await;

        let client = RegistryClient::new(connect(control_port).await, connect(bench_port).await);
        let chosen = client
            .suggest_node(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(chosen, "b");
        control.await.unwrap();
    }
}
