//! Pending join requests
//!
//! Listing, accepting and rejecting all require the caller's rank to meet
//! `ranks.join_requests`. Accepting is a full membership transfer.

use super::errors::GroupResult;
use super::membership::{MembershipKind, MembershipReport, MembershipSession};
use super::traits::{GroupCrypto, GroupGateway};
use super::types::{GroupData, JoinRequest, UserContext};
use crate::config::Config;
use tracing::info;

/// Join request operations against one group
pub struct JoinRequestManager<'a> {
    gateway: &'a dyn GroupGateway,
    crypto: &'a dyn GroupCrypto,
    config: &'a Config,
}

impl<'a> JoinRequestManager<'a> {
    pub fn new(gateway: &'a dyn GroupGateway, crypto: &'a dyn GroupCrypto, config: &'a Config) -> Self {
        Self { gateway, crypto, config }
    }

    /// Pending requests after `cursor`; pass the last item of the previous
    /// page to continue, `None` to start over
    pub async fn list_requests(
        &self,
        data: &GroupData,
        user: &UserContext,
        cursor: Option<&JoinRequest>,
    ) -> GroupResult<Vec<JoinRequest>> {
        data.require_rank("list join requests", self.config.ranks.join_requests)?;
        self.gateway.list_join_requests(&user.jwt, &data.group_id, data.rank, cursor).await
    }

    /// Accept `user_id`'s request, transferring the key history to them.
    ///
    /// Follow-up page failures are reported as `PartialUploadFailure`.
    pub async fn accept(
        &self,
        data: &GroupData,
        user: &UserContext,
        user_id: &str,
        recipient_public_key: &str,
    ) -> GroupResult<MembershipReport> {
        data.require_rank("accept join requests", self.config.ranks.join_requests)?;

        let report = MembershipSession::new(self.gateway, self.crypto, &self.config.keys)
            .run(MembershipKind::AcceptJoinRequest, data, user, user_id, recipient_public_key)
            .await?;
        report.into_result()
    }

    /// Reject `user_id`'s request
    pub async fn reject(&self, data: &GroupData, user: &UserContext, user_id: &str) -> GroupResult<()> {
        data.require_rank("reject join requests", self.config.ranks.join_requests)?;
        self.gateway.reject_join_request(&user.jwt, &data.group_id, data.rank, user_id).await?;
        info!(group_id = %data.group_id, user_id, "Join request rejected");
        Ok(())
    }
}
