//! Deterministic crypto engine for tests
//!
//! Outputs are SHA-256 digests of the inputs, so the same inputs always
//! produce the same "keys" and tests can predict derived ids.

use crate::core_group::errors::{GroupError, GroupResult};
use crate::core_group::traits::GroupCrypto;
use crate::core_group::types::{GroupKey, RotationArtifact, RotationOutput, UserContext};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Mock crypto engine
#[derive(Default)]
pub struct MockGroupCrypto {
    derivations: AtomicUsize,
    fail_derivations: AtomicBool,
}

impl MockGroupCrypto {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `derive_rotated_key` call fail
    pub fn set_fail_derivations(&self, fail: bool) {
        self.fail_derivations.store(fail, Ordering::SeqCst);
    }

    /// Number of successful derivations
    pub fn derivations(&self) -> usize {
        self.derivations.load(Ordering::SeqCst)
    }

    /// Id the mock assigns to the key rotated from `pre_key_id` with `server_output`
    pub fn rotated_key_id(pre_key_id: &str, server_output: &str) -> String {
        format!("{}-rot-{}", pre_key_id, &digest(&[server_output])[..8])
    }
}

#[async_trait]
impl GroupCrypto for MockGroupCrypto {
    async fn prepare_keys_for_new_member(
        &self,
        page_payload: &str,
        key_count: usize,
        recipient_public_key: &str,
    ) -> GroupResult<String> {
        Ok(format!(
            "sealed:{}:{}:{}",
            recipient_public_key,
            key_count,
            digest(&[page_payload, recipient_public_key])
        ))
    }

    async fn prepare_rotation(&self, latest: &GroupKey, public_key: &str) -> GroupResult<RotationArtifact> {
        Ok(RotationArtifact {
            pre_group_key_id: latest.group_key_id.clone(),
            payload: digest(&[&latest.group_key, public_key]),
        })
    }

    async fn derive_rotated_key(
        &self,
        pre_key: &GroupKey,
        output: &RotationOutput,
        user: &UserContext,
    ) -> GroupResult<GroupKey> {
        if self.fail_derivations.load(Ordering::SeqCst) {
            return Err(GroupError::Crypto("derivation disabled".to_string()));
        }
        if pre_key.group_key_id != output.pre_group_key_id {
            return Err(GroupError::Crypto(format!(
                "output rotates from {} but pre-key is {}",
                output.pre_group_key_id, pre_key.group_key_id
            )));
        }

        self.derivations.fetch_add(1, Ordering::SeqCst);
        Ok(GroupKey {
            group_key_id: Self::rotated_key_id(&pre_key.group_key_id, &output.server_output),
            group_key: digest(&[&pre_key.group_key, &output.server_output]),
            private_group_key: digest(&[&pre_key.private_group_key, &user.private_key]),
            public_group_key: digest(&[&pre_key.public_group_key, &user.public_key]),
            time: pre_key.time + 1,
        })
    }
}
