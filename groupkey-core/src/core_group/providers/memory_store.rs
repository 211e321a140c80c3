//! In-memory group store

use crate::core_group::errors::GroupResult;
use crate::core_group::traits::GroupStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory store (for testing)
#[derive(Clone, Default)]
pub struct MemoryGroupStore {
    values: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryGroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `set` calls so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn keys(&self) -> Vec<String> {
        self.values.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl GroupStore for MemoryGroupStore {
    async fn get(&self, key: &str) -> GroupResult<Option<Vec<u8>>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> GroupResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }
}
