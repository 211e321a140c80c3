//! Group facade
//!
//! Owns one group's data, the acting user and the injected collaborators,
//! and exposes the key lifecycle as methods. Mutating operations take
//! `&mut self`; wrap a `Group` in [`GroupRegistry`](super::registry::GroupRegistry)
//! to share it between tasks.

use super::errors::{GroupError, GroupResult};
use super::fetch::fetch_new_keys;
use super::join_requests::JoinRequestManager;
use super::key_store::KeyStore;
use super::membership::{MembershipKind, MembershipReport, MembershipSession};
use super::rotation::{FinishOutcome, RotationCoordinator, RotationState};
use super::traits::{load_group_data, save_group_data, GroupCrypto, GroupGateway, GroupStore};
use super::types::{GroupData, JoinRequest, RotationArtifact, UserContext};
use crate::config::Config;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Collaborators shared by every group of one client
#[derive(Clone)]
pub struct GroupContext {
    pub gateway: Arc<dyn GroupGateway>,
    pub crypto: Arc<dyn GroupCrypto>,
    pub store: Arc<dyn GroupStore>,
    pub config: Arc<Config>,
}

impl GroupContext {
    pub fn new(
        gateway: Arc<dyn GroupGateway>,
        crypto: Arc<dyn GroupCrypto>,
        store: Arc<dyn GroupStore>,
        config: Arc<Config>,
    ) -> Self {
        Self { gateway, crypto, store, config }
    }
}

/// One group as seen by the local member
pub struct Group {
    data: GroupData,
    user: UserContext,
    ctx: GroupContext,
    rotation: RotationCoordinator,
}

impl Group {
    pub fn new(data: GroupData, user: UserContext, ctx: GroupContext) -> Self {
        let rotation = RotationCoordinator::new(
            ctx.gateway.clone(),
            ctx.crypto.clone(),
            ctx.store.clone(),
            ctx.config.clone(),
        );
        Self { data, user, ctx, rotation }
    }

    /// Load a persisted group
    pub async fn load(group_id: &str, user: UserContext, ctx: GroupContext) -> GroupResult<Self> {
        let data = load_group_data(ctx.store.as_ref(), &ctx.config.store.namespace, group_id)
            .await?
            .ok_or_else(|| GroupError::GroupNotFound(group_id.to_string()))?;
        debug!(group_id, keys = data.keys.len(), "Loaded group");
        Ok(Self::new(data, user, ctx))
    }

    pub fn id(&self) -> &str {
        &self.data.group_id
    }

    pub fn data(&self) -> &GroupData {
        &self.data
    }

    pub fn keys(&self) -> &KeyStore {
        &self.data.keys
    }

    pub fn user(&self) -> &UserContext {
        &self.user
    }

    pub fn rotation_state(&self) -> &RotationState {
        self.rotation.state()
    }

    /// Save the current group data
    pub async fn persist(&self) -> GroupResult<()> {
        save_group_data(self.ctx.store.as_ref(), &self.ctx.config.store.namespace, &self.data).await
    }

    /// Invite `user_id`, transferring the whole key history to them
    pub async fn invite(&self, user_id: &str, recipient_public_key: &str) -> GroupResult<MembershipReport> {
        self.data.require_rank("invite members", self.ctx.config.ranks.invite)?;

        let report = MembershipSession::new(self.ctx.gateway.as_ref(), self.ctx.crypto.as_ref(), &self.ctx.config.keys)
            .run(MembershipKind::Invite, &self.data, &self.user, user_id, recipient_public_key)
            .await?;
        report.into_result()
    }

    /// Join request operations for this group
    pub fn join_requests(&self) -> JoinRequests<'_> {
        JoinRequests {
            manager: JoinRequestManager::new(self.ctx.gateway.as_ref(), self.ctx.crypto.as_ref(), &self.ctx.config),
            data: &self.data,
            user: &self.user,
        }
    }

    /// Leave the group. Local data is left in the store.
    pub async fn leave(self) -> GroupResult<()> {
        self.ctx.gateway.leave_group(&self.user.jwt, &self.data.group_id).await?;
        info!(group_id = %self.data.group_id, user_id = %self.user.user_id, "Left group");
        Ok(())
    }

    /// Fetch keys newer than the newest local key; persists when any arrive
    pub async fn fetch_keys(&mut self) -> GroupResult<usize> {
        let appended = fetch_new_keys(
            self.ctx.gateway.as_ref(),
            &self.user.jwt,
            &self.data.group_id,
            &mut self.data.keys,
            self.ctx.config.keys.fetch_batch_threshold,
        )
        .await?;

        if appended > 0 {
            self.persist().await?;
        }
        Ok(appended)
    }

    pub async fn prepare_rotation(&mut self) -> GroupResult<RotationArtifact> {
        self.rotation.prepare(&self.data, &self.user).await
    }

    pub async fn publish_rotation(&mut self) -> GroupResult<()> {
        self.rotation.publish(&mut self.data, &self.user).await
    }

    /// Prepare and publish a rotation
    pub async fn rotate(&mut self) -> GroupResult<()> {
        self.rotation.rotate(&mut self.data, &self.user).await
    }

    /// Run the rotation finish loop
    pub async fn finish_rotation(&mut self) -> GroupResult<FinishOutcome> {
        self.rotation.finish(&mut self.data, &self.user).await
    }

    /// [`finish_rotation`](Self::finish_rotation) bounded by `rotation.finish_timeout`
    pub async fn finish_rotation_with_timeout(&mut self) -> GroupResult<FinishOutcome> {
        let limit = self.ctx.config.rotation.finish_timeout;
        let result = tokio::time::timeout(limit, self.rotation.finish(&mut self.data, &self.user)).await;
        match result {
            Ok(result) => result,
            Err(_) => {
                self.rotation.abandon_finish(&self.data);
                warn!(group_id = %self.data.group_id, timeout = ?limit, "Rotation finish timed out");
                Err(GroupError::Timeout(format!("rotation finish exceeded {:?}", limit)))
            }
        }
    }
}

/// Join request handle borrowed from a [`Group`]
pub struct JoinRequests<'a> {
    manager: JoinRequestManager<'a>,
    data: &'a GroupData,
    user: &'a UserContext,
}

impl JoinRequests<'_> {
    pub async fn list(&self, cursor: Option<&JoinRequest>) -> GroupResult<Vec<JoinRequest>> {
        self.manager.list_requests(self.data, self.user, cursor).await
    }

    pub async fn accept(&self, user_id: &str, recipient_public_key: &str) -> GroupResult<MembershipReport> {
        self.manager.accept(self.data, self.user, user_id, recipient_public_key).await
    }

    pub async fn reject(&self, user_id: &str) -> GroupResult<()> {
        self.manager.reject(self.data, self.user, user_id).await
    }
}
