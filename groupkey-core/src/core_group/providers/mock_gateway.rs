//! Mock key server for testing
//!
//! Keeps a server-side key log, pending rotation outputs and join
//! requests, and records every membership request so tests can assert
//! on exactly what was sent.

use crate::core_group::errors::{GroupError, GroupResult};
use crate::core_group::membership::MembershipKind;
use crate::core_group::traits::gateway::{GroupGateway, MemberKeysPage, MemberKeysRequest};
use crate::core_group::types::{GroupKey, JoinRequest, KeyCursor, RotationArtifact, RotationOutput};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Initial membership request as received by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub kind: MembershipKind,
    pub group_id: String,
    pub user_id: String,
    pub key_count: usize,
    pub rank: u32,
    pub payload: String,
    /// Session id handed back ("" when no more pages are needed)
    pub session_id: String,
}

/// Follow-up page as received by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPage {
    pub kind: MembershipKind,
    pub session_id: String,
    pub user_id: String,
    pub page_index: usize,
    pub payload: String,
}

struct MockState {
    log: Vec<GroupKey>,
    delayed: Vec<(usize, Vec<GroupKey>)>,
    scripted_batches: VecDeque<Vec<GroupKey>>,
    fetch_cursors: Vec<KeyCursor>,
    fail_fetch: bool,
    fetch_delay: Option<Duration>,

    pending_outputs: Vec<RotationOutput>,
    committed: Vec<(RotationOutput, GroupKey)>,
    published: Vec<RotationArtifact>,

    session_threshold: usize,
    requests: Vec<RecordedRequest>,
    pages: Vec<RecordedPage>,
    failing_pages: HashSet<usize>,

    join_requests: Vec<JoinRequest>,
    rejected: Vec<String>,
    left: Vec<String>,
}

/// Mock gateway
pub struct MockGroupGateway {
    state: Mutex<MockState>,
}

impl Default for MockGroupGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGroupGateway {
    /// Create a mock server with an empty key log
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                log: Vec::new(),
                delayed: Vec::new(),
                scripted_batches: VecDeque::new(),
                fetch_cursors: Vec::new(),
                fail_fetch: false,
                fetch_delay: None,
                pending_outputs: Vec::new(),
                committed: Vec::new(),
                published: Vec::new(),
                session_threshold: 50,
                requests: Vec::new(),
                pages: Vec::new(),
                failing_pages: HashSet::new(),
                join_requests: Vec::new(),
                rejected: Vec::new(),
                left: Vec::new(),
            }),
        }
    }

    /// Create a mock server whose key log starts with `keys`
    pub fn with_keys(keys: Vec<GroupKey>) -> Self {
        let gateway = Self::new();
        gateway.state().log = keys;
        gateway
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add keys to the server log
    pub fn push_server_keys(&self, keys: Vec<GroupKey>) {
        self.state().log.extend(keys);
    }

    /// Add keys to the server log right before fetch call `call` (1-based)
    pub fn reveal_keys_at_fetch(&self, call: usize, keys: Vec<GroupKey>) {
        self.state().delayed.push((call, keys));
    }

    /// Answer the next fetches with these batches, ignoring the log
    pub fn script_fetch_batches(&self, batches: Vec<Vec<GroupKey>>) {
        self.state().scripted_batches.extend(batches);
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.state().fail_fetch = fail;
    }

    /// Sleep before answering each fetch
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.state().fetch_delay = Some(delay);
    }

    pub fn fetch_calls(&self) -> usize {
        self.state().fetch_cursors.len()
    }

    pub fn fetch_cursors(&self) -> Vec<KeyCursor> {
        self.state().fetch_cursors.clone()
    }

    pub fn server_keys(&self) -> Vec<GroupKey> {
        self.state().log.clone()
    }

    pub fn push_rotation_output(&self, output: RotationOutput) {
        self.state().pending_outputs.push(output);
    }

    pub fn pending_outputs(&self) -> Vec<RotationOutput> {
        self.state().pending_outputs.clone()
    }

    pub fn committed(&self) -> Vec<(RotationOutput, GroupKey)> {
        self.state().committed.clone()
    }

    pub fn published(&self) -> Vec<RotationArtifact> {
        self.state().published.clone()
    }

    /// Key counts above this get a session id for further pages
    pub fn set_session_threshold(&self, threshold: usize) {
        self.state().session_threshold = threshold;
    }

    /// Make uploads of these page indices fail
    pub fn fail_pages(&self, pages: impl IntoIterator<Item = usize>) {
        self.state().failing_pages.extend(pages);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state().requests.clone()
    }

    pub fn pages(&self) -> Vec<RecordedPage> {
        self.state().pages.clone()
    }

    pub fn push_join_request(&self, request: JoinRequest) {
        self.state().join_requests.push(request);
    }

    pub fn join_requests(&self) -> Vec<JoinRequest> {
        self.state().join_requests.clone()
    }

    pub fn rejected(&self) -> Vec<String> {
        self.state().rejected.clone()
    }

    pub fn left_groups(&self) -> Vec<String> {
        self.state().left.clone()
    }

    fn open_session(&self, kind: MembershipKind, request: MemberKeysRequest<'_>) -> String {
        let mut state = self.state();
        let session_id = if request.key_count > state.session_threshold {
            format!("session-{}", uuid::Uuid::new_v4())
        } else {
            String::new()
        };

        if kind == MembershipKind::AcceptJoinRequest {
            state.join_requests.retain(|r| r.user_id != request.user_id);
        }
        state.requests.push(RecordedRequest {
            kind,
            group_id: request.group_id.to_string(),
            user_id: request.user_id.to_string(),
            key_count: request.key_count,
            rank: request.rank,
            payload: request.payload.to_string(),
            session_id: session_id.clone(),
        });
        session_id
    }

    fn receive_page(&self, kind: MembershipKind, page: MemberKeysPage<'_>) -> GroupResult<()> {
        let mut state = self.state();
        if state.failing_pages.contains(&page.page_index) {
            return Err(GroupError::Gateway(format!("page {} rejected", page.page_index)));
        }
        if !state.requests.iter().any(|r| r.session_id == page.session_id) {
            return Err(GroupError::Gateway(format!("unknown session {}", page.session_id)));
        }
        state.pages.push(RecordedPage {
            kind,
            session_id: page.session_id.to_string(),
            user_id: page.user_id.to_string(),
            page_index: page.page_index,
            payload: page.payload.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl GroupGateway for MockGroupGateway {
    async fn invite_user(&self, _jwt: &str, request: MemberKeysRequest<'_>) -> GroupResult<String> {
        Ok(self.open_session(MembershipKind::Invite, request))
    }

    async fn invite_user_page(&self, _jwt: &str, page: MemberKeysPage<'_>) -> GroupResult<()> {
        self.receive_page(MembershipKind::Invite, page)
    }

    async fn accept_join_request(&self, _jwt: &str, request: MemberKeysRequest<'_>) -> GroupResult<String> {
        Ok(self.open_session(MembershipKind::AcceptJoinRequest, request))
    }

    async fn accept_join_request_page(&self, _jwt: &str, page: MemberKeysPage<'_>) -> GroupResult<()> {
        self.receive_page(MembershipKind::AcceptJoinRequest, page)
    }

    async fn reject_join_request(&self, _jwt: &str, _group_id: &str, _rank: u32, user_id: &str) -> GroupResult<()> {
        let mut state = self.state();
        let before = state.join_requests.len();
        state.join_requests.retain(|r| r.user_id != user_id);
        if state.join_requests.len() == before {
            return Err(GroupError::Gateway(format!("no join request from {}", user_id)));
        }
        state.rejected.push(user_id.to_string());
        Ok(())
    }

    async fn list_join_requests(
        &self,
        _jwt: &str,
        _group_id: &str,
        _rank: u32,
        cursor: Option<&JoinRequest>,
    ) -> GroupResult<Vec<JoinRequest>> {
        let mut requests = self.state().join_requests.clone();
        requests.sort_by(|a, b| (a.time, &a.user_id).cmp(&(b.time, &b.user_id)));
        if let Some(cursor) = cursor {
            requests.retain(|r| (r.time, &r.user_id) > (cursor.time, &cursor.user_id));
        }
        requests.truncate(50);
        Ok(requests)
    }

    async fn leave_group(&self, _jwt: &str, group_id: &str) -> GroupResult<()> {
        self.state().left.push(group_id.to_string());
        Ok(())
    }

    async fn publish_rotation(&self, _jwt: &str, _group_id: &str, artifact: &RotationArtifact) -> GroupResult<()> {
        self.state().published.push(artifact.clone());
        Ok(())
    }

    async fn pending_rotation_outputs(&self, _jwt: &str, _group_id: &str) -> GroupResult<Vec<RotationOutput>> {
        Ok(self.state().pending_outputs.clone())
    }

    async fn commit_rotated_key(
        &self,
        _jwt: &str,
        _group_id: &str,
        output: &RotationOutput,
        key: &GroupKey,
    ) -> GroupResult<()> {
        let mut state = self.state();
        state.pending_outputs.retain(|o| o != output);

        if !state.log.iter().any(|k| k.group_key_id == key.group_key_id) {
            let mut stored = key.clone();
            if let Some(last) = state.log.last() {
                stored.time = stored.time.max(last.time);
            }
            state.log.push(stored);
        }
        state.committed.push((output.clone(), key.clone()));
        Ok(())
    }

    async fn fetch_keys(&self, _jwt: &str, _group_id: &str, cursor: &KeyCursor) -> GroupResult<Vec<GroupKey>> {
        let delay = self.state().fetch_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if state.fail_fetch {
            return Err(GroupError::Gateway("fetch unavailable".to_string()));
        }

        state.fetch_cursors.push(cursor.clone());
        let call = state.fetch_cursors.len();
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.delayed)
            .into_iter()
            .partition(|(at, _)| *at <= call);
        state.delayed = waiting;
        for (_, keys) in due {
            state.log.extend(keys);
        }

        if let Some(batch) = state.scripted_batches.pop_front() {
            return Ok(batch);
        }

        let start = match state.log.iter().position(|k| k.group_key_id == cursor.group_key_id) {
            Some(position) => position + 1,
            None => state.log.iter().position(|k| k.time > cursor.time).unwrap_or(state.log.len()),
        };
        Ok(state.log[start..].to_vec())
    }
}
