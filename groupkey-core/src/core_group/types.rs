//! Group key data model

use super::errors::{GroupError, GroupResult};
use super::key_store::KeyStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Group identifier
pub type GroupId = String;

/// Group key generation identifier
pub type GroupKeyId = String;

/// User identifier
pub type UserId = String;

/// One generation of a group's key material.
///
/// All key fields are opaque handles produced by the crypto engine.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupKey {
    pub group_key_id: GroupKeyId,
    pub group_key: String,
    pub private_group_key: String,
    pub public_group_key: String,
    /// Creation time (ms since epoch), non-decreasing across a key history
    pub time: u64,
}

impl GroupKey {
    /// Cursor pointing at this key, for fetching newer ones
    pub fn cursor(&self) -> KeyCursor {
        KeyCursor { time: self.time, group_key_id: self.group_key_id.clone() }
    }
}

impl fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupKey")
            .field("group_key_id", &self.group_key_id)
            .field("time", &self.time)
            .finish_non_exhaustive()
    }
}

/// Position in a key history used for fetch pagination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCursor {
    pub time: u64,
    pub group_key_id: GroupKeyId,
}

/// Server-side artifact needed to derive a rotated key from a known generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationOutput {
    /// Key generation this rotation starts from
    pub pre_group_key_id: GroupKeyId,
    /// Opaque payload for the crypto engine
    pub server_output: String,
}

/// Output of the prepare step, submitted by `publish`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationArtifact {
    /// Key generation the rotation was prepared from
    pub pre_group_key_id: GroupKeyId,
    /// Opaque payload for the gateway
    pub payload: String,
}

/// Pending request to join a group; also the cursor for listing more
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub user_id: UserId,
    pub time: u64,
}

/// Per-group state held by the local client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupData {
    pub group_id: GroupId,
    pub parent_group_id: Option<GroupId>,
    /// Caller's permission level in this group; lower is more privileged
    pub rank: u32,
    /// Set while a rotation is pending
    pub key_update: bool,
    pub create_time: u64,
    pub joined_time: u64,
    pub keys: KeyStore,
}

impl GroupData {
    /// Create group data from the initial key history
    pub fn new(group_id: impl Into<GroupId>, rank: u32, keys: Vec<GroupKey>) -> GroupResult<Self> {
        let mut store = KeyStore::new();
        store.append(keys)?;
        let create_time = store.iter().next().map(|k| k.time).unwrap_or_default();

        Ok(Self {
            group_id: group_id.into(),
            parent_group_id: None,
            rank,
            key_update: false,
            create_time,
            joined_time: create_time,
            keys: store,
        })
    }

    /// Fail with `PermissionDenied` unless `rank <= required`
    pub fn require_rank(&self, action: &'static str, required: u32) -> GroupResult<()> {
        if self.rank > required {
            return Err(GroupError::PermissionDenied { action, rank: self.rank, required });
        }
        Ok(())
    }
}

/// Explicit identity of the acting user.
///
/// Passed into every operation instead of living in process-wide state.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct UserContext {
    pub user_id: UserId,
    pub public_key: String,
    pub private_key: String,
    /// Session token attached to gateway requests
    pub jwt: String,
}

impl UserContext {
    pub fn new(
        user_id: impl Into<UserId>,
        public_key: impl Into<String>,
        private_key: impl Into<String>,
        jwt: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            public_key: public_key.into(),
            private_key: private_key.into(),
            jwt: jwt.into(),
        }
    }
}

impl fmt::Debug for UserContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserContext")
            .field("user_id", &self.user_id)
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}
