use crate::{KeyplaceError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub registry: Option<RegistryConfig>,
    #[serde(default)]
    pub selection: Option<SelectionKind>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
    /// Only default nodes join the pool; the rest are declared for other tooling.
    #[serde(default = "default_true")]
    pub default: bool,
}

/// Registry endpoints. The control port takes tuple writes, the benchmark
/// port serves lookups and capacity releases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub host: String,
    pub control_port: u16,
    pub benchmark_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionKind {
    Random,
    LeastLoaded,
    Registry,
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_redis_port() -> u16 {
    6379
}

fn default_true() -> bool {
    true
}

impl ClientConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("KEYPLACE").separator("__"))
            .build()
            .map_err(|e| KeyplaceError::Config(e.to_string()))?;

        let config: ClientConfig = settings
            .try_deserialize()
            .map_err(|e| KeyplaceError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.id.trim().is_empty() {
                return Err(KeyplaceError::Config("node id cannot be empty".to_string()));
            }
            if !seen.insert(node.id.as_str()) {
                return Err(KeyplaceError::Config(format!(
                    "duplicate node id: {}",
                    node.id
                )));
            }
            if node.host.trim().is_empty() {
                return Err(KeyplaceError::Config(format!(
                    "host cannot be empty for node {}",
                    node.id
                )));
            }
            if node.port == 0 {
                return Err(KeyplaceError::Config(format!(
                    "invalid port 0 for node {}",
                    node.id
                )));
            }
        }

        if self.default_nodes().next().is_none() {
            return Err(KeyplaceError::Config(
                "data nodes are not specified".to_string(),
            ));
        }

        if let Some(registry) = &self.registry {
            if registry.host.trim().is_empty() {
                return Err(KeyplaceError::Config(
                    "registry host cannot be empty".to_string(),
                ));
            }
            if registry.control_port == 0 || registry.benchmark_port == 0 {
                return Err(KeyplaceError::Config(
                    "registry ports must be non-zero".to_string(),
                ));
            }
        } else if self.selection == Some(SelectionKind::Registry) {
            return Err(KeyplaceError::Config(
                "registry selection requires a registry section".to_string(),
            ));
        }

        Ok(())
    }

    pub fn default_nodes(&self) -> impl Iterator<Item = &NodeConfig> {
        self.nodes.iter().filter(|node| node.default)
    }

    /// Random without a registry, least-loaded with one, unless set explicitly.
    pub fn selection_or_default(&self) -> SelectionKind {
        match (self.selection, &self.registry) {
            (Some(kind), _) => kind,
            (None, Some(_)) => SelectionKind::LeastLoaded,
            (None, None) => SelectionKind::Random,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}
