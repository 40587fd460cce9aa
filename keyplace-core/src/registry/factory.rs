use super::{PlacementRegistry, RegistryClient, WireClient};
use crate::config::RegistryConfig;
use crate::{KeyplaceError, Result};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default)]
pub struct RegistryBuilder {
    host: Option<String>,
    control_port: Option<u16>,
    benchmark_port: Option<u16>,
    timeout: Option<Duration>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::new()
            .host(config.host.clone())
            .control_port(config.control_port)
            .benchmark_port(config.benchmark_port)
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn control_port(mut self, port: u16) -> Self {
        self.control_port = Some(port);
        self
    }

    pub fn benchmark_port(mut self, port: u16) -> Self {
        self.benchmark_port = Some(port);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn resolve_host(&self) -> Result<String> {
        let host = self.host.as_deref().unwrap_or_default().trim().to_string();
        if host.is_empty() {
            return Err(KeyplaceError::Config(
                "registry host cannot be empty".to_string(),
            ));
        }

        Ok(host)
    }

    fn resolve_port(port: Option<u16>, name: &str) -> Result<u16> {
        match port {
            Some(port) if port > 0 => Ok(port),
            _ => Err(KeyplaceError::Config(format!(
                "registry {} port is required",
                name
            ))),
        }
    }

    /// Open both registry channels. A channel that cannot be opened fails the
    /// build with a connection error.
    pub async fn build(&self) -> Result<Arc<dyn PlacementRegistry>> {
        let host = self.resolve_host()?;
        let control_port = Self::resolve_port(self.control_port, "control")?;
        let benchmark_port = Self::resolve_port(self.benchmark_port, "benchmark")?;
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);

        let control = WireClient::connect(&host, control_port, timeout).await?;
        let benchmark = WireClient::connect(&host, benchmark_port, timeout).await?;

        tracing::info!(
            "Registry connected at {} (control {}, benchmark {})",
            host,
            control_port,
            benchmark_port
        );
        Ok(Arc::new(RegistryClient::new(control, benchmark)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_build_requires_host_and_ports() {
        let err = RegistryBuilder::new()
            .control_port(1)
            .benchmark_port(2)
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, KeyplaceError::Config(_)));

        let err = RegistryBuilder::new()
            .host("127.0.0.1")
            .control_port(1)
            .build()
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("benchmark"));
    }

    #[tokio::test]
    async fn test_build_connects_both_channels() {
        let control = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let bench = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let config = RegistryConfig {
            host: "127.0.0.1".to_string(),
            control_port: control.local_addr().unwrap().port(),
            benchmark_port: bench.local_addr().unwrap().port(),
        };

        let registry = RegistryBuilder::from_config(&config)
            .timeout(Duration::from_secs(5))
            .build()
            .await
            .unwrap();

        let (_c, _) = control.accept().await.unwrap();
        let (_b, _) = bench.accept().await.unwrap();
        registry.close().await.unwrap();
    }
}
