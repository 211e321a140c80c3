//! Rotation scenarios across members
//!
//! Several members share one mock key server. An admin publishes rotations
//! and other members, whose local histories lag behind, finish them.

use crate::config::Config;
use crate::core_group::errors::GroupError;
use crate::core_group::group::{Group, GroupContext};
use crate::core_group::providers::{MemoryGroupStore, MockGroupCrypto, MockGroupGateway};
use crate::core_group::rotation::{FinishOutcome, RotationState};
use crate::core_group::types::{GroupData, UserContext};
use crate::test_utils::{make_keys, rotation_output};
use std::sync::Arc;

struct Server {
    gateway: Arc<MockGroupGateway>,
    store: MemoryGroupStore,
}

impl Server {
    fn new(history: usize) -> Self {
        Self { gateway: Arc::new(MockGroupGateway::with_keys(make_keys(history))), store: MemoryGroupStore::new() }
    }

    fn ctx(&self) -> GroupContext {
        GroupContext::new(
            self.gateway.clone(),
            Arc::new(MockGroupCrypto::new()),
            Arc::new(self.store.clone()),
            Arc::new(Config::default()),
        )
    }

    /// Member whose local history holds the first `known` server keys
    fn member(&self, name: &str, rank: u32, known: usize) -> Group {
        let data = GroupData::new("g1", rank, make_keys(known)).unwrap();
        let user = UserContext::new(name, format!("{}-pk", name), format!("{}-sk", name), format!("{}-jwt", name));
        Group::new(data, user, self.ctx())
    }
}

#[tokio::test]
async fn test_lagging_member_catches_up_and_finishes() {
    let server = Server::new(5);
    let mut admin = server.member("admin", 0, 5);
    let mut member = server.member("bob", 2, 3);

    admin.rotate().await.unwrap();
    server.gateway.push_rotation_output(rotation_output("key-4", "rot-1"));

    // bob cannot start a rotation but can finish one
    assert!(matches!(member.rotate().await, Err(GroupError::PermissionDenied { .. })));
    let outcome = member.finish_rotation().await.unwrap();

    assert_eq!(outcome, FinishOutcome::Completed { resolved: 1, rounds: 2 });
    assert_eq!(member.keys().len(), 6);
    assert_eq!(member.keys().latest().unwrap().group_key_id, MockGroupCrypto::rotated_key_id("key-4", "rot-1"));

    // The admin picks the new generation up with a plain fetch
    assert_eq!(admin.fetch_keys().await.unwrap(), 1);
    assert_eq!(admin.rotation_state(), &RotationState::Published);
    let outcome = admin.finish_rotation().await.unwrap();
    assert_eq!(outcome.rounds(), 0);
    assert_eq!(admin.rotation_state(), &RotationState::Idle);
}

#[tokio::test]
async fn test_long_catch_up_spans_fetch_batches() {
    let server = Server::new(130);
    let mut member = server.member("bob", 2, 10);
    server.gateway.push_rotation_output(rotation_output("key-129", "late"));

    let outcome = member.finish_rotation().await.unwrap().ensure_complete().unwrap();

    assert_eq!(outcome.rounds(), 2);
    assert_eq!(member.keys().len(), 131);
    // Round 1: batch of 120 (> threshold) then an empty one; round 2: the rotated key
    assert_eq!(server.gateway.fetch_calls(), 3);
}

#[tokio::test]
async fn test_incomplete_finish_resumes_after_reload() {
    let server = Server::new(3);
    let mut member = server.member("bob", 2, 3);
    server.gateway.push_rotation_output(rotation_output("key-3", "pending"));

    let outcome = member.finish_rotation().await.unwrap();
    assert!(!outcome.is_complete());
    assert_eq!(server.gateway.fetch_calls(), 10);

    // The missing generation shows up later; a fresh process picks up from the store
    server.gateway.push_server_keys(make_keys(4).split_off(3));
    let user = member.user().clone();
    drop(member);

    let mut reloaded = Group::load("g1", user, server.ctx()).await.unwrap();
    let outcome = reloaded.finish_rotation().await.unwrap();
    assert_eq!(outcome, FinishOutcome::Completed { resolved: 1, rounds: 2 });
    assert!(server.gateway.pending_outputs().is_empty());
}
