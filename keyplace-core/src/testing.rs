use crate::registry::{PlacementRegistry, TupleLocation};
use crate::{KeyplaceError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct MockState {
    placements: HashMap<String, String>,
    reject_inserts: bool,
    unavailable: bool,
    suggestion: Option<String>,
    calls: Vec<String>,
}

/// In-process placement registry recording every call.
#[derive(Default)]
pub struct MockRegistry {
    state: Mutex<MockState>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn set_reject_inserts(&self, reject: bool) {
        self.lock().reject_inserts = reject;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    pub fn set_suggestion(&self, node_id: &str) {
        self.lock().suggestion = Some(node_id.to_string());
    }

    pub fn place(&self, key: &str, node_id: &str) {
        self.lock()
            .placements
            .insert(key.to_string(), node_id.to_string());
    }

    pub fn placement(&self, key: &str) -> Option<String> {
        self.lock().placements.get(key).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn record(&self, call: String) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(call);
        if state.unavailable {
            return Err(KeyplaceError::RegistryUnavailable(
                "mock registry is down".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PlacementRegistry for MockRegistry {
    async fn insert_tuple(&self, node_id: &str, key: &str) -> Result<bool> {
        self.record(format!("insert_tuple {} {}", node_id, key))?;
        let mut state = self.lock();
        if state.reject_inserts {
            return Ok(false);
        }
        state
            .placements
            .insert(key.to_string(), node_id.to_string());
        Ok(true)
    }

    async fn delete_tuple(&self, node_id: &str, key: &str) -> Result<bool> {
        self.record(format!("delete_tuple {} {}", node_id, key))?;
        let mut state = self.lock();
        if state.placements.get(key).map(String::as_str) == Some(node_id) {
            state.placements.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn locate_tuple(&self, key: &str) -> Result<Option<TupleLocation>> {
        self.record(format!("locate_tuple {}", key))?;
        Ok(self
            .lock()
            .placements
            .get(key)
            .map(|node_id| TupleLocation {
                node_id: node_id.clone(),
                exists: true,
            }))
    }

    async fn release_capacity(&self, node_id: &str) -> Result<()> {
        self.record(format!("release_capacity {}", node_id))
    }

    async fn suggest_node(&self, candidates: &[String]) -> Result<String> {
        self.record(format!("suggest_node {}", candidates.join(",")))?;
        let state = self.lock();
        state
            .suggestion
            .clone()
            .or_else(|| candidates.first().cloned())
            .ok_or(KeyplaceError::NoNodesAvailable)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
