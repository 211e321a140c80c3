//! Key rotation
//!
//! A rotation moves through `Idle -> Prepared -> Published -> Finishing`
//! and back to `Idle`. Finishing may also start from `Idle`, for a member
//! completing a rotation somebody else published.
//!
//! The finish step is a bounded catch-up loop. Rotation outputs can arrive
//! before the key generation they rotate from, so outputs whose pre-key is
//! unknown are deferred, new keys are fetched, and the deferred set is
//! retried, up to `rotation.max_rounds` times.

use super::errors::{GroupError, GroupResult};
use super::fetch::fetch_new_keys;
use super::traits::{save_group_data, GroupCrypto, GroupGateway, GroupStore};
use super::types::{GroupData, RotationArtifact, RotationOutput, UserContext};
use crate::config::Config;
use crate::metrics;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Rotation state machine position
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RotationState {
    #[default]
    Idle,
    /// Artifact prepared but not yet submitted
    Prepared(RotationArtifact),
    /// Artifact submitted, waiting for finish
    Published,
    /// Finish loop running
    Finishing,
}

impl RotationState {
    pub fn name(&self) -> &'static str {
        match self {
            RotationState::Idle => "idle",
            RotationState::Prepared(_) => "prepared",
            RotationState::Published => "published",
            RotationState::Finishing => "finishing",
        }
    }
}

/// Result of a finish run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishOutcome {
    /// Every pending output resolved. Zero rounds means nothing was pending.
    Completed { resolved: usize, rounds: u32 },
    /// Rounds exhausted with outputs whose pre-key never arrived
    Incomplete { resolved: usize, rounds: u32, unresolved: Vec<RotationOutput> },
}

impl FinishOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, FinishOutcome::Completed { .. })
    }

    pub fn rounds(&self) -> u32 {
        match self {
            FinishOutcome::Completed { rounds, .. } | FinishOutcome::Incomplete { rounds, .. } => *rounds,
        }
    }

    pub fn resolved(&self) -> usize {
        match self {
            FinishOutcome::Completed { resolved, .. } | FinishOutcome::Incomplete { resolved, .. } => *resolved,
        }
    }

    /// Turn `Incomplete` into `RotationIncomplete`
    pub fn ensure_complete(self) -> GroupResult<Self> {
        match self {
            FinishOutcome::Incomplete { rounds, unresolved, .. } => {
                Err(GroupError::RotationIncomplete { unresolved: unresolved.len(), rounds })
            }
            complete => Ok(complete),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            FinishOutcome::Completed { rounds: 0, .. } => "noop",
            FinishOutcome::Completed { .. } => "completed",
            FinishOutcome::Incomplete { .. } => "incomplete",
        }
    }
}

/// Drives one group's rotations
pub struct RotationCoordinator {
    gateway: Arc<dyn GroupGateway>,
    crypto: Arc<dyn GroupCrypto>,
    store: Arc<dyn GroupStore>,
    config: Arc<Config>,
    state: RotationState,
}

impl RotationCoordinator {
    pub fn new(
        gateway: Arc<dyn GroupGateway>,
        crypto: Arc<dyn GroupCrypto>,
        store: Arc<dyn GroupStore>,
        config: Arc<Config>,
    ) -> Self {
        Self { gateway, crypto, store, config, state: RotationState::Idle }
    }

    pub fn state(&self) -> &RotationState {
        &self.state
    }

    /// Prepare a rotation from the newest key. No network traffic.
    ///
    /// Preparing again replaces an unpublished artifact.
    pub async fn prepare(&mut self, data: &GroupData, user: &UserContext) -> GroupResult<RotationArtifact> {
        data.require_rank("rotate keys", self.config.ranks.rotation)?;
        if !matches!(self.state, RotationState::Idle | RotationState::Prepared(_)) {
            return Err(GroupError::InvalidState { expected: "idle", actual: self.state.name() });
        }

        let latest = data.keys.latest()?;
        let artifact = self.crypto.prepare_rotation(latest, &user.public_key).await?;
        debug!(group_id = %data.group_id, pre_key = %artifact.pre_group_key_id, "Rotation prepared");

        self.state = RotationState::Prepared(artifact.clone());
        Ok(artifact)
    }

    /// Submit the prepared artifact and mark the group as updating
    pub async fn publish(&mut self, data: &mut GroupData, user: &UserContext) -> GroupResult<()> {
        let artifact = match &self.state {
            RotationState::Prepared(artifact) => artifact,
            other => return Err(GroupError::InvalidState { expected: "prepared", actual: other.name() }),
        };

        self.gateway.publish_rotation(&user.jwt, &data.group_id, artifact).await?;
        info!(group_id = %data.group_id, pre_key = %artifact.pre_group_key_id, "Rotation published");

        data.key_update = true;
        self.state = RotationState::Published;
        Ok(())
    }

    /// Prepare and publish in one step
    pub async fn rotate(&mut self, data: &mut GroupData, user: &UserContext) -> GroupResult<()> {
        self.prepare(data, user).await?;
        self.publish(data, user).await
    }

    /// Resolve pending rotation outputs, catching up on missing keys.
    ///
    /// `Incomplete` is not an error; use [`FinishOutcome::ensure_complete`]
    /// to treat it as one. Collaborator errors abort the run and leave the
    /// state machine where it was.
    pub async fn finish(&mut self, data: &mut GroupData, user: &UserContext) -> GroupResult<FinishOutcome> {
        let previous = match std::mem::replace(&mut self.state, RotationState::Finishing) {
            state @ (RotationState::Idle | RotationState::Published) => state,
            other => {
                let actual = other.name();
                self.state = other;
                return Err(GroupError::InvalidState { expected: "idle or published", actual });
            }
        };

        let result = self.run_finish(data, user).await;
        self.state = match &result {
            Ok(FinishOutcome::Completed { .. }) => RotationState::Idle,
            _ => previous,
        };
        result
    }

    /// Recover from a finish run dropped mid-loop.
    ///
    /// Leaves `Published` while the group still expects a rotation,
    /// `Idle` otherwise. No-op outside `Finishing`.
    pub fn abandon_finish(&mut self, data: &GroupData) {
        if self.state == RotationState::Finishing {
            self.state = if data.key_update { RotationState::Published } else { RotationState::Idle };
            warn!(group_id = %data.group_id, state = self.state.name(), "Finish run abandoned");
        }
    }

    async fn run_finish(&self, data: &mut GroupData, user: &UserContext) -> GroupResult<FinishOutcome> {
        let mut pending = self.gateway.pending_rotation_outputs(&user.jwt, &data.group_id).await?;
        if pending.is_empty() {
            // Store untouched: `key_update` stays as persisted
            debug!(group_id = %data.group_id, "No pending rotation outputs");
            let outcome = FinishOutcome::Completed { resolved: 0, rounds: 0 };
            metrics::rotation_finished(outcome.label());
            return Ok(outcome);
        }

        info!(group_id = %data.group_id, pending = pending.len(), "Finishing key rotation");

        let mut rounds_left = self.config.rotation.max_rounds;
        let mut rounds = 0u32;
        let mut resolved = 0usize;
        loop {
            rounds += 1;
            let mut deferred = Vec::new();

            for output in pending {
                let Some(pre_key) = data.keys.get(&output.pre_group_key_id) else {
                    debug!(round = rounds, pre_key = %output.pre_group_key_id, "Pre-key unknown, deferring output");
                    metrics::rotation_output("deferred");
                    deferred.push(output);
                    continue;
                };

                let key = self
                    .crypto
                    .derive_rotated_key(pre_key, &output, user)
                    .await
                    .map_err(|e| {
                        metrics::rotation_output("failed");
                        e
                    })?;
                self.gateway.commit_rotated_key(&user.jwt, &data.group_id, &output, &key).await?;
                debug!(
                    round = rounds,
                    pre_key = %output.pre_group_key_id,
                    key_id = %key.group_key_id,
                    "Rotation output resolved"
                );
                metrics::rotation_output("resolved");
                resolved += 1;
            }

            rounds_left = rounds_left.saturating_sub(1);
            let fetched = fetch_new_keys(
                self.gateway.as_ref(),
                &user.jwt,
                &data.group_id,
                &mut data.keys,
                self.config.keys.fetch_batch_threshold,
            )
            .await?;
            debug!(round = rounds, fetched, deferred = deferred.len(), rounds_left, "Rotation round complete");

            pending = deferred;
            if pending.is_empty() || rounds_left == 0 {
                break;
            }
        }

        metrics::rotation_rounds(rounds);
        let outcome = if pending.is_empty() {
            data.key_update = false;
            info!(group_id = %data.group_id, resolved, rounds, "Key rotation finished");
            FinishOutcome::Completed { resolved, rounds }
        } else {
            warn!(
                group_id = %data.group_id,
                resolved,
                rounds,
                unresolved = pending.len(),
                "Key rotation incomplete, pre-keys never arrived"
            );
            FinishOutcome::Incomplete { resolved, rounds, unresolved: pending }
        };

        save_group_data(self.store.as_ref(), &self.config.store.namespace, data).await?;
        metrics::rotation_finished(outcome.label());
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_group::providers::{MemoryGroupStore, MockGroupCrypto, MockGroupGateway};
    use crate::core_group::traits::load_group_data;
    use crate::test_utils::{make_group, make_key, rotation_output, test_user};

    struct Harness {
        gateway: Arc<MockGroupGateway>,
        crypto: Arc<MockGroupCrypto>,
        store: MemoryGroupStore,
        coordinator: RotationCoordinator,
    }

    fn harness(data: &GroupData) -> Harness {
        let gateway = Arc::new(MockGroupGateway::with_keys(data.keys.as_slice().to_vec()));
        let crypto = Arc::new(MockGroupCrypto::new());
        let store = MemoryGroupStore::new();
        let coordinator = RotationCoordinator::new(
            gateway.clone(),
            crypto.clone(),
            Arc::new(store.clone()),
            Arc::new(Config::default()),
        );
        Harness { gateway, crypto, store, coordinator }
    }

    #[tokio::test]
    async fn test_prepare_publish_finish_cycle() {
        let mut data = make_group("g1", 0, 3);
        let user = test_user();
        let mut h = harness(&data);

        let artifact = h.coordinator.prepare(&data, &user).await.unwrap();
        assert_eq!(artifact.pre_group_key_id, "key-2");
        assert!(h.gateway.published().is_empty());

        h.coordinator.publish(&mut data, &user).await.unwrap();
        assert!(data.key_update);
        assert_eq!(h.gateway.published(), vec![artifact]);
        assert_eq!(h.coordinator.state(), &RotationState::Published);

        h.gateway.push_rotation_output(rotation_output("key-2", "out-1"));
        let outcome = h.coordinator.finish(&mut data, &user).await.unwrap();

        assert_eq!(outcome, FinishOutcome::Completed { resolved: 1, rounds: 1 });
        assert!(!data.key_update);
        assert_eq!(data.keys.len(), 4);
        assert!(data.keys.contains(&MockGroupCrypto::rotated_key_id("key-2", "out-1")));
        assert_eq!(h.coordinator.state(), &RotationState::Idle);
        assert_eq!(h.store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_rank_above_threshold_cannot_prepare() {
        let data = make_group("g1", 2, 3);
        let mut h = harness(&data);

        let err = h.coordinator.prepare(&data, &test_user()).await.unwrap_err();
        assert!(matches!(err, GroupError::PermissionDenied { required: 1, .. }));
        assert_eq!(h.coordinator.state(), &RotationState::Idle);
    }

    #[tokio::test]
    async fn test_publish_requires_prepared() {
        let mut data = make_group("g1", 0, 3);
        let mut h = harness(&data);

        let err = h.coordinator.publish(&mut data, &test_user()).await.unwrap_err();
        assert!(matches!(err, GroupError::InvalidState { expected: "prepared", actual: "idle" }));
        assert!(!data.key_update);
    }

    #[tokio::test]
    async fn test_finish_rejected_while_prepared() {
        let mut data = make_group("g1", 0, 3);
        let user = test_user();
        let mut h = harness(&data);

        h.coordinator.prepare(&data, &user).await.unwrap();
        let err = h.coordinator.finish(&mut data, &user).await.unwrap_err();
        assert!(matches!(err, GroupError::InvalidState { actual: "prepared", .. }));
        assert!(matches!(h.coordinator.state(), RotationState::Prepared(_)));
    }

    #[tokio::test]
    async fn test_finish_without_outputs_is_noop() {
        let mut data = make_group("g1", 0, 3);
        let mut h = harness(&data);

        let outcome = h.coordinator.finish(&mut data, &test_user()).await.unwrap();
        assert_eq!(outcome, FinishOutcome::Completed { resolved: 0, rounds: 0 });
        assert_eq!(h.gateway.fetch_calls(), 0);
        assert_eq!(h.store.write_count(), 0);
        assert_eq!(data.keys.len(), 3);
    }

    #[tokio::test]
    async fn test_noop_finish_keeps_memory_and_store_in_sync() {
        let mut data = make_group("g1", 0, 3);
        let user = test_user();
        let mut h = harness(&data);
        h.coordinator.rotate(&mut data, &user).await.unwrap();
        save_group_data(&h.store, "group_data", &data).await.unwrap();

        let outcome = h.coordinator.finish(&mut data, &user).await.unwrap();
        assert_eq!(outcome.rounds(), 0);
        assert_eq!(h.store.write_count(), 1);

        let saved = load_group_data(&h.store, "group_data", "g1").await.unwrap().unwrap();
        assert!(data.key_update);
        assert_eq!(saved.key_update, data.key_update);
    }

    #[tokio::test]
    async fn test_first_key_is_a_valid_pre_key() {
        let mut data = make_group("g1", 0, 3);
        let mut h = harness(&data);
        h.gateway.push_rotation_output(rotation_output("key-0", "from-first"));

        let outcome = h.coordinator.finish(&mut data, &test_user()).await.unwrap();
        assert_eq!(outcome, FinishOutcome::Completed { resolved: 1, rounds: 1 });
        assert_eq!(h.crypto.derivations(), 1);
    }

    #[tokio::test]
    async fn test_converges_when_fetch_supplies_missing_pre_key() {
        let mut data = make_group("g1", 0, 3);
        let mut h = harness(&data);
        h.gateway.push_rotation_output(rotation_output("key-3", "late"));
        h.gateway.reveal_keys_at_fetch(1, vec![make_key("key-3", 3)]);

        let outcome = h.coordinator.finish(&mut data, &test_user()).await.unwrap();

        assert_eq!(outcome, FinishOutcome::Completed { resolved: 1, rounds: 2 });
        assert_eq!(h.gateway.fetch_calls(), 2);
        assert!(h.gateway.pending_outputs().is_empty());
        assert_eq!(data.keys.latest().unwrap().group_key_id, MockGroupCrypto::rotated_key_id("key-3", "late"));
    }

    #[tokio::test]
    async fn test_chained_outputs_resolve_in_order_across_rounds() {
        let mut data = make_group("g1", 0, 3);
        let mut h = harness(&data);
        let first = MockGroupCrypto::rotated_key_id("key-2", "a");
        h.gateway.push_rotation_output(rotation_output(&first, "b"));
        h.gateway.push_rotation_output(rotation_output("key-2", "a"));

        let outcome = h.coordinator.finish(&mut data, &test_user()).await.unwrap();

        assert_eq!(outcome, FinishOutcome::Completed { resolved: 2, rounds: 2 });
        assert_eq!(data.keys.len(), 5);
        assert!(data.keys.contains(&MockGroupCrypto::rotated_key_id(&first, "b")));
    }

    #[tokio::test]
    async fn test_bounded_failure_after_max_rounds() {
        let mut data = make_group("g1", 0, 3);
        let mut h = harness(&data);
        h.coordinator.prepare(&data, &test_user()).await.unwrap();
        h.coordinator.publish(&mut data, &test_user()).await.unwrap();
        h.gateway.push_rotation_output(rotation_output("key-2", "ok"));
        h.gateway.push_rotation_output(rotation_output("never-arrives", "lost"));

        let outcome = h.coordinator.finish(&mut data, &test_user()).await.unwrap();

        match &outcome {
            FinishOutcome::Incomplete { resolved, rounds, unresolved } => {
                assert_eq!(*resolved, 1);
                assert_eq!(*rounds, 10);
                assert_eq!(unresolved, &vec![rotation_output("never-arrives", "lost")]);
            }
            other => panic!("expected incomplete, got {:?}", other),
        }
        assert_eq!(h.gateway.fetch_calls(), 10);
        assert!(data.key_update);
        assert_eq!(h.coordinator.state(), &RotationState::Published);

        // Progress is persisted even when incomplete
        let saved = load_group_data(&h.store, "group_data", "g1").await.unwrap().unwrap();
        assert_eq!(saved.keys.len(), 4);
        assert!(saved.key_update);

        assert!(matches!(
            outcome.ensure_complete(),
            Err(GroupError::RotationIncomplete { unresolved: 1, rounds: 10 })
        ));
    }

    #[tokio::test]
    async fn test_derivation_failure_aborts_without_persisting() {
        let mut data = make_group("g1", 0, 3);
        let mut h = harness(&data);
        h.gateway.push_rotation_output(rotation_output("key-2", "x"));
        h.crypto.set_fail_derivations(true);

        let err = h.coordinator.finish(&mut data, &test_user()).await.unwrap_err();
        assert!(matches!(err, GroupError::Crypto(_)));
        assert_eq!(h.store.write_count(), 0);
        assert_eq!(h.gateway.pending_outputs().len(), 1);
        assert_eq!(h.coordinator.state(), &RotationState::Idle);
    }

    #[tokio::test]
    async fn test_fetch_failure_propagates() {
        let mut data = make_group("g1", 0, 3);
        let mut h = harness(&data);
        h.gateway.push_rotation_output(rotation_output("missing", "x"));
        h.gateway.set_fail_fetch(true);

        let err = h.coordinator.finish(&mut data, &test_user()).await.unwrap_err();
        assert!(matches!(err, GroupError::Gateway(_)));
    }

    #[test]
    fn test_ensure_complete_passes_completed_through() {
        let outcome = FinishOutcome::Completed { resolved: 2, rounds: 1 };
        assert_eq!(outcome.clone().ensure_complete().unwrap(), outcome);
        assert_eq!(outcome.label(), "completed");
        assert_eq!(FinishOutcome::Completed { resolved: 0, rounds: 0 }.label(), "noop");
    }
}
