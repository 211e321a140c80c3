//! Per-group serialization
//!
//! Holds each open group behind its own `tokio::sync::Mutex`, so
//! operations on one group run one at a time while different groups
//! proceed independently.

use super::errors::GroupResult;
use super::group::{Group, GroupContext};
use super::types::{GroupId, UserContext};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Shared handle to one group
pub type GroupHandle = Arc<Mutex<Group>>;

/// Open groups of one client
pub struct GroupRegistry {
    ctx: GroupContext,
    groups: RwLock<HashMap<GroupId, GroupHandle>>,
}

impl GroupRegistry {
    pub fn new(ctx: GroupContext) -> Self {
        Self { ctx, groups: RwLock::new(HashMap::new()) }
    }

    pub fn context(&self) -> &GroupContext {
        &self.ctx
    }

    /// Register a group, replacing any open group with the same id
    pub async fn insert(&self, group: Group) -> GroupHandle {
        let group_id = group.id().to_string();
        let handle = Arc::new(Mutex::new(group));
        self.groups.write().await.insert(group_id, handle.clone());
        handle
    }

    pub async fn get(&self, group_id: &str) -> Option<GroupHandle> {
        self.groups.read().await.get(group_id).cloned()
    }

    /// Open group, loading it from the store on first use
    pub async fn open(&self, group_id: &str, user: UserContext) -> GroupResult<GroupHandle> {
        if let Some(handle) = self.get(group_id).await {
            return Ok(handle);
        }

        let group = Group::load(group_id, user, self.ctx.clone()).await?;
        let mut groups = self.groups.write().await;
        // Another task may have loaded it while the store was read
        let handle = groups
            .entry(group_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(group)))
            .clone();
        debug!(group_id, open = groups.len(), "Group opened");
        Ok(handle)
    }

    pub async fn remove(&self, group_id: &str) -> Option<GroupHandle> {
        self.groups.write().await.remove(group_id)
    }

    pub async fn len(&self) -> usize {
        self.groups.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.groups.read().await.is_empty()
    }
}
