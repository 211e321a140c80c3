//! Paginated key transfer for onboarding a member
//!
//! Inviting a user and accepting a join request move the same data: the
//! whole key history, re-encrypted for the recipient, one page at a time.
//! The first page rides along with the initial request. If the server
//! answers with a session id, the remaining pages are uploaded against
//! that session, all at once, and every page's outcome is collected.

use super::errors::{GroupError, GroupResult};
use super::page_codec::{self, KeyPage};
use super::traits::gateway::{MemberKeysPage, MemberKeysRequest};
use super::traits::{GroupCrypto, GroupGateway};
use super::types::{GroupData, UserContext};
use crate::config::KeyTransferConfig;
use crate::metrics;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Which server flow a membership transfer belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipKind {
    Invite,
    AcceptJoinRequest,
}

impl MembershipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipKind::Invite => "invite",
            MembershipKind::AcceptJoinRequest => "accept_join_request",
        }
    }
}

/// Server's answer to the initial request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Empty session id: the first page was all the server needed
    NotRequired,
    /// Remaining pages go to this session
    Open(String),
}

impl From<String> for SessionState {
    fn from(session_id: String) -> Self {
        if session_id.is_empty() {
            SessionState::NotRequired
        } else {
            SessionState::Open(session_id)
        }
    }
}

/// Outcome of one follow-up page upload
#[derive(Debug)]
pub struct PageOutcome {
    pub page_index: usize,
    pub key_count: usize,
    pub result: GroupResult<()>,
}

/// Everything that happened during one membership transfer
#[derive(Debug)]
pub struct MembershipReport {
    pub kind: MembershipKind,
    pub session: SessionState,
    /// Continuation flag of the inline first page
    pub first_page_has_more: bool,
    /// Follow-up pages, ordered by page index
    pub pages: Vec<PageOutcome>,
}

impl MembershipReport {
    pub fn uploaded_pages(&self) -> usize {
        self.pages.iter().filter(|p| p.result.is_ok()).count()
    }

    pub fn failed_pages(&self) -> Vec<usize> {
        self.pages.iter().filter(|p| p.result.is_err()).map(|p| p.page_index).collect()
    }

    /// `PartialUploadFailure` if any follow-up page failed
    pub fn into_result(self) -> GroupResult<Self> {
        let failed_pages = self.failed_pages();
        match (&self.session, failed_pages.is_empty()) {
            (SessionState::Open(session_id), false) => Err(GroupError::PartialUploadFailure {
                session_id: session_id.clone(),
                failed_pages,
                total_pages: self.pages.len(),
            }),
            _ => Ok(self),
        }
    }
}

/// Sequences the pages of one membership transfer
pub struct MembershipSession<'a> {
    gateway: &'a dyn GroupGateway,
    crypto: &'a dyn GroupCrypto,
    config: &'a KeyTransferConfig,
}

impl<'a> MembershipSession<'a> {
    pub fn new(gateway: &'a dyn GroupGateway, crypto: &'a dyn GroupCrypto, config: &'a KeyTransferConfig) -> Self {
        Self { gateway, crypto, config }
    }

    fn page(&self, data: &GroupData, page_index: usize) -> GroupResult<KeyPage> {
        page_codec::page(data.keys.as_slice(), page_index, self.config.page_size, self.config.page_boundary)
    }

    /// Transfer `data`'s key history to `recipient_id`.
    ///
    /// Errors from the initial request or from re-encryption abort the
    /// transfer. Follow-up page failures do not: they are reported per
    /// page in the returned report.
    pub async fn run(
        &self,
        kind: MembershipKind,
        data: &GroupData,
        user: &UserContext,
        recipient_id: &str,
        recipient_public_key: &str,
    ) -> GroupResult<MembershipReport> {
        let first = self.page(data, 0)?;
        let sealed_first = self
            .crypto
            .prepare_keys_for_new_member(&first.payload, first.key_count(), recipient_public_key)
            .await?;

        let request = MemberKeysRequest {
            group_id: &data.group_id,
            user_id: recipient_id,
            key_count: data.keys.len(),
            rank: data.rank,
            payload: &sealed_first,
        };
        let session_id = match kind {
            MembershipKind::Invite => self.gateway.invite_user(&user.jwt, request).await?,
            MembershipKind::AcceptJoinRequest => self.gateway.accept_join_request(&user.jwt, request).await?,
        };

        let session_id = match SessionState::from(session_id) {
            SessionState::NotRequired => {
                info!(
                    group_id = %data.group_id,
                    recipient = recipient_id,
                    kind = kind.as_str(),
                    "Key transfer complete, no session required"
                );
                return Ok(MembershipReport {
                    kind,
                    session: SessionState::NotRequired,
                    first_page_has_more: first.has_more,
                    pages: Vec::new(),
                });
            }
            SessionState::Open(id) => id,
        };

        if !first.has_more {
            debug!(session_id = %session_id, "Session opened, page 1 will be empty");
        }

        // An open session always expects page 1, even when it is empty
        let mut sealed_pages = Vec::new();
        let mut page_index = 1;
        loop {
            let page = self.page(data, page_index)?;
            let has_more = page.has_more;
            let sealed = self
                .crypto
                .prepare_keys_for_new_member(&page.payload, page.key_count(), recipient_public_key)
                .await?;
            sealed_pages.push((page_index, page.key_count(), sealed));
            if !has_more {
                break;
            }
            page_index += 1;
        }

        let session = session_id.as_str();
        let uploads = sealed_pages.iter().map(|(page_index, key_count, payload)| async move {
            let page = MemberKeysPage {
                group_id: &data.group_id,
                session_id: session,
                user_id: recipient_id,
                page_index: *page_index,
                payload,
            };
            let result = match kind {
                MembershipKind::Invite => self.gateway.invite_user_page(&user.jwt, page).await,
                MembershipKind::AcceptJoinRequest => self.gateway.accept_join_request_page(&user.jwt, page).await,
            };
            PageOutcome { page_index: *page_index, key_count: *key_count, result }
        });
        let pages = join_all(uploads).await;

        for outcome in &pages {
            match &outcome.result {
                Ok(()) => metrics::page_upload("success"),
                Err(e) => {
                    metrics::page_upload("failed");
                    warn!(session_id = session, page = outcome.page_index, error = %e, "Key page upload failed");
                }
            }
        }

        let report = MembershipReport {
            kind,
            session: SessionState::Open(session_id),
            first_page_has_more: first.has_more,
            pages,
        };
        info!(
            group_id = %data.group_id,
            recipient = recipient_id,
            kind = kind.as_str(),
            uploaded = report.uploaded_pages(),
            failed = report.failed_pages().len(),
            "Key transfer session finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_group::page_codec::PageBoundary;
    use crate::core_group::providers::{MockGroupCrypto, MockGroupGateway};
    use crate::test_utils::{make_group, test_user};

    fn compat() -> KeyTransferConfig {
        KeyTransferConfig::default()
    }

    #[tokio::test]
    async fn test_hundred_keys_send_one_extra_page() {
        let gateway = MockGroupGateway::new();
        let crypto = MockGroupCrypto::new();
        let config = compat();
        let data = make_group("g1", 0, 100);

        let report = MembershipSession::new(&gateway, &crypto, &config)
            .run(MembershipKind::Invite, &data, &test_user(), "bob", "bob-pk")
            .await
            .unwrap();

        assert!(matches!(report.session, SessionState::Open(_)));
        assert!(report.first_page_has_more);
        assert_eq!(report.pages.len(), 1);
        assert_eq!(report.pages[0].page_index, 1);
        // Compat boundary: page 1 covers keys 50..99
        assert_eq!(report.pages[0].key_count, 49);

        let requests = gateway.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].key_count, 100);
        assert_eq!(gateway.pages().len(), 1);
        assert_eq!(gateway.pages()[0].session_id, requests[0].session_id);
    }

    #[tokio::test]
    async fn test_single_key_sends_no_extra_pages() {
        let gateway = MockGroupGateway::new();
        let crypto = MockGroupCrypto::new();
        let config = compat();
        let data = make_group("g1", 0, 1);

        let report = MembershipSession::new(&gateway, &crypto, &config)
            .run(MembershipKind::Invite, &data, &test_user(), "bob", "bob-pk")
            .await
            .unwrap();

        assert_eq!(report.session, SessionState::NotRequired);
        assert!(!report.first_page_has_more);
        assert!(report.pages.is_empty());
        assert!(gateway.pages().is_empty());
        assert_eq!(gateway.requests()[0].key_count, 1);
    }

    #[tokio::test]
    async fn test_open_session_always_gets_page_one() {
        // 51 keys open a session, but under the compat boundary page 0 holds
        // every key that is sent: page 1 still follows, empty
        let gateway = MockGroupGateway::new();
        let crypto = MockGroupCrypto::new();
        let config = compat();
        let data = make_group("g1", 0, 51);

        let report = MembershipSession::new(&gateway, &crypto, &config)
            .run(MembershipKind::Invite, &data, &test_user(), "bob", "bob-pk")
            .await
            .unwrap();

        assert!(matches!(report.session, SessionState::Open(_)));
        assert!(!report.first_page_has_more);
        assert_eq!(report.pages.len(), 1);
        assert_eq!(report.pages[0].page_index, 1);
        assert_eq!(report.pages[0].key_count, 0);
        assert_eq!(gateway.pages().len(), 1);
    }

    #[tokio::test]
    async fn test_open_session_with_small_history_sends_one_page() {
        let gateway = MockGroupGateway::new();
        gateway.set_session_threshold(0);
        let crypto = MockGroupCrypto::new();
        let config = compat();
        let data = make_group("g1", 0, 10);

        let report = MembershipSession::new(&gateway, &crypto, &config)
            .run(MembershipKind::AcceptJoinRequest, &data, &test_user(), "bob", "bob-pk")
            .await
            .unwrap();

        assert!(matches!(report.session, SessionState::Open(_)));
        assert_eq!(report.failed_pages(), Vec::<usize>::new());
        assert_eq!(gateway.pages().len(), 1);
        assert_eq!(gateway.pages()[0].page_index, 1);
    }

    #[tokio::test]
    async fn test_failed_pages_are_collected_not_fatal() {
        let gateway = MockGroupGateway::new();
        gateway.fail_pages([2]);
        let crypto = MockGroupCrypto::new();
        let config = KeyTransferConfig { page_boundary: PageBoundary::Inclusive, ..compat() };
        let data = make_group("g1", 0, 200);

        let report = MembershipSession::new(&gateway, &crypto, &config)
            .run(MembershipKind::Invite, &data, &test_user(), "bob", "bob-pk")
            .await
            .unwrap();

        assert_eq!(report.pages.len(), 3);
        assert_eq!(report.uploaded_pages(), 2);
        assert_eq!(report.failed_pages(), vec![2]);
        let uploaded: Vec<usize> = gateway.pages().iter().map(|p| p.page_index).collect();
        assert!(uploaded.contains(&1) && uploaded.contains(&3));

        match report.into_result() {
            Err(GroupError::PartialUploadFailure { failed_pages, total_pages, .. }) => {
                assert_eq!(failed_pages, vec![2]);
                assert_eq!(total_pages, 3);
            }
            other => panic!("expected partial upload failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_accept_uses_accept_endpoints() {
        let gateway = MockGroupGateway::new();
        let crypto = MockGroupCrypto::new();
        let config = compat();
        let data = make_group("g1", 0, 120);

        MembershipSession::new(&gateway, &crypto, &config)
            .run(MembershipKind::AcceptJoinRequest, &data, &test_user(), "dave", "dave-pk")
            .await
            .unwrap();

        assert!(gateway.requests().iter().all(|r| r.kind == MembershipKind::AcceptJoinRequest));
        assert!(gateway.pages().iter().all(|p| p.kind == MembershipKind::AcceptJoinRequest && p.user_id == "dave"));
        assert_eq!(gateway.pages().len(), 2);
    }

    #[tokio::test]
    async fn test_zero_page_size_fails_before_any_request() {
        let gateway = MockGroupGateway::new();
        let crypto = MockGroupCrypto::new();
        let config = KeyTransferConfig { page_size: 0, ..compat() };
        let data = make_group("g1", 0, 100);

        let err = MembershipSession::new(&gateway, &crypto, &config)
            .run(MembershipKind::Invite, &data, &test_user(), "bob", "bob-pk")
            .await
            .unwrap_err();

        assert!(matches!(err, GroupError::InvalidPageSize));
        assert!(gateway.requests().is_empty());
        assert!(gateway.pages().is_empty());
    }

    #[test]
    fn test_session_state_from_id() {
        assert_eq!(SessionState::from(String::new()), SessionState::NotRequired);
        assert_eq!(SessionState::from("s".to_string()), SessionState::Open("s".to_string()));
    }
}
