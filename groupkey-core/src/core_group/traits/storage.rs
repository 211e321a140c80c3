//! Local store trait

use crate::core_group::errors::GroupResult;
use crate::core_group::types::GroupData;
use async_trait::async_trait;
use tracing::debug;

/// Key-value store for persisted group data
#[async_trait]
pub trait GroupStore: Send + Sync {
    /// Value under `key`, if any
    async fn get(&self, key: &str) -> GroupResult<Option<Vec<u8>>>;

    /// Replace the value under `key`
    async fn set(&self, key: &str, value: Vec<u8>) -> GroupResult<()>;
}

/// Store key of one group's data: `{namespace}_id_{group_id}`
pub fn group_data_key(namespace: &str, group_id: &str) -> String {
    format!("{}_id_{}", namespace, group_id)
}

/// Write `data` as JSON under its group data key
pub async fn save_group_data(store: &dyn GroupStore, namespace: &str, data: &GroupData) -> GroupResult<()> {
    let key = group_data_key(namespace, &data.group_id);
    let bytes = serde_json::to_vec(data)?;
    debug!(key = %key, keys = data.keys.len(), bytes = bytes.len(), "Persisting group data");
    store.set(&key, bytes).await
}

/// Read a group's data back, `None` if it was never saved
pub async fn load_group_data(
    store: &dyn GroupStore,
    namespace: &str,
    group_id: &str,
) -> GroupResult<Option<GroupData>> {
    match store.get(&group_data_key(namespace, group_id)).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}
