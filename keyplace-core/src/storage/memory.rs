use super::{FieldMap, NodeStore};
use crate::{KeyplaceError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
struct MemoryState {
    records: HashMap<String, FieldMap>,
    index: HashMap<String, f64>,
}

/// In-process node backend standing in for Redis in tests.
///
/// `set_unreachable(true)` makes every call fail with a connection error,
/// which is how a dead node looks to the coordinator.
#[derive(Default)]
pub struct MemoryNodeStore {
    state: Mutex<MemoryState>,
    unreachable: AtomicBool,
    closed: AtomicBool,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn contains_record(&self, key: &str) -> bool {
        self.lock().records.contains_key(key)
    }

    pub fn contains_index_entry(&self, key: &str) -> bool {
        self.lock().index.contains_key(key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A poisoned lock only means another test thread panicked mid-write.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(KeyplaceError::Connection(
                "memory node is unreachable".to_string(),
            ));
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(KeyplaceError::Connection(
                "memory node is closed".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    async fn set_fields(&self, key: &str, fields: &FieldMap) -> Result<usize> {
        self.check()?;
        // Like HSET, nothing is created without at least one field.
        if fields.is_empty() {
            return Ok(0);
        }
        let mut state = self.lock();
        let record = state.records.entry(key.to_string()).or_default();
        let mut created = 0;
        for (name, value) in fields {
            if record.insert(name.clone(), value.clone()).is_none() {
                created += 1;
            }
        }
        Ok(created)
    }

    async fn get_all_fields(&self, key: &str) -> Result<FieldMap> {
        self.check()?;
        Ok(self.lock().records.get(key).cloned().unwrap_or_default())
    }

    async fn get_fields(&self, key: &str, names: &[String]) -> Result<FieldMap> {
        self.check()?;
        let state = self.lock();
        let Some(record) = state.records.get(key) else {
            return Ok(FieldMap::new());
        };

        Ok(names
            .iter()
            .filter_map(|name| record.get(name).map(|value| (name.clone(), value.clone())))
            .collect())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check()?;
        Ok(self.lock().records.contains_key(key))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check()?;
        self.lock().records.remove(key);
        Ok(())
    }

    async fn index_add(&self, score: f64, key: &str) -> Result<()> {
        self.check()?;
        self.lock().index.insert(key.to_string(), score);
        Ok(())
    }

    async fn index_range(&self, min_score: f64, count: usize) -> Result<Vec<String>> {
        self.check()?;
        let state = self.lock();
        let mut entries: Vec<(f64, &String)> = state
            .index
            .iter()
            .filter(|(_, score)| **score >= min_score)
            .map(|(key, score)| (*score, key))
            .collect();
        // Same tie-break as a sorted set: score, then member.
        entries.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(b.1)));

        Ok(entries
            .into_iter()
            .take(count)
            .map(|(_, key)| key.clone())
            .collect())
    }

    async fn remove_with_index(&self, key: &str) -> Result<bool> {
        self.check()?;
        let mut state = self.lock();
        let removed_record = state.records.remove(key).is_some();
        let removed_index = state.index.remove(key).is_some();
        Ok(removed_record && removed_index)
    }

    async fn record_count(&self) -> Result<u64> {
        self.check()?;
        let state = self.lock();
        let index_key = u64::from(!state.index.is_empty());
        Ok(state.records.len() as u64 + index_key)
    }

    async fn flush_all(&self) -> Result<()> {
        self.check()?;
        let mut state = self.lock();
        state.records.clear();
        state.index.clear();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(KeyplaceError::Connection(
                "memory node is unreachable".to_string(),
            ));
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
