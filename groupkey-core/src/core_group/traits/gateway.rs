//! Key server gateway trait
//!
//! Every call carries the caller's session token. Transport, signing and
//! retry policy are the implementation's concern.

use crate::core_group::errors::GroupResult;
use crate::core_group::types::{GroupKey, JoinRequest, KeyCursor, RotationArtifact, RotationOutput};
use async_trait::async_trait;

/// Initial request of a membership transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberKeysRequest<'a> {
    pub group_id: &'a str,
    /// Invited user, or the user whose join request is accepted
    pub user_id: &'a str,
    /// Total keys in the sender's history, so the server can size the session
    pub key_count: usize,
    pub rank: u32,
    /// Re-encrypted first page
    pub payload: &'a str,
}

/// Follow-up page of a membership transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberKeysPage<'a> {
    pub group_id: &'a str,
    pub session_id: &'a str,
    pub user_id: &'a str,
    pub page_index: usize,
    /// Re-encrypted page
    pub payload: &'a str,
}

/// Key server operations used by the engine
#[async_trait]
pub trait GroupGateway: Send + Sync {
    /// Invite a user, uploading the first key page.
    ///
    /// Returns a session id for the remaining pages, or an empty string
    /// when the server needs no more pages.
    async fn invite_user(&self, jwt: &str, request: MemberKeysRequest<'_>) -> GroupResult<String>;

    /// Upload one more key page for an invite session
    async fn invite_user_page(&self, jwt: &str, page: MemberKeysPage<'_>) -> GroupResult<()>;

    /// Accept a join request, uploading the first key page.
    ///
    /// Same session semantics as [`GroupGateway::invite_user`].
    async fn accept_join_request(&self, jwt: &str, request: MemberKeysRequest<'_>) -> GroupResult<String>;

    /// Upload one more key page for an accept session
    async fn accept_join_request_page(&self, jwt: &str, page: MemberKeysPage<'_>) -> GroupResult<()>;

    /// Reject a pending join request
    async fn reject_join_request(&self, jwt: &str, group_id: &str, rank: u32, user_id: &str) -> GroupResult<()>;

    /// List pending join requests after `cursor` (from the start when `None`)
    async fn list_join_requests(
        &self,
        jwt: &str,
        group_id: &str,
        rank: u32,
        cursor: Option<&JoinRequest>,
    ) -> GroupResult<Vec<JoinRequest>>;

    /// Leave the group
    async fn leave_group(&self, jwt: &str, group_id: &str) -> GroupResult<()>;

    /// Start a key rotation with a prepared artifact
    async fn publish_rotation(&self, jwt: &str, group_id: &str, artifact: &RotationArtifact) -> GroupResult<()>;

    /// Rotation outputs the caller has not finished yet, oldest first
    async fn pending_rotation_outputs(&self, jwt: &str, group_id: &str) -> GroupResult<Vec<RotationOutput>>;

    /// Upload the key derived from one rotation output, marking it done for the caller
    async fn commit_rotated_key(
        &self,
        jwt: &str,
        group_id: &str,
        output: &RotationOutput,
        key: &GroupKey,
    ) -> GroupResult<()>;

    /// Keys newer than `cursor`, oldest first
    async fn fetch_keys(&self, jwt: &str, group_id: &str, cursor: &KeyCursor) -> GroupResult<Vec<GroupKey>>;
}
