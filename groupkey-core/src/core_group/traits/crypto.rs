//! Crypto engine trait
//!
//! Key material passes through this trait as opaque strings. The engine
//! never inspects it.

use crate::core_group::errors::GroupResult;
use crate::core_group::types::{GroupKey, RotationArtifact, RotationOutput, UserContext};
use async_trait::async_trait;

/// Cryptographic operations needed by the group key lifecycle
#[async_trait]
pub trait GroupCrypto: Send + Sync {
    /// Re-encrypt a serialized key page for a new member
    ///
    /// # Arguments
    /// * `page_payload` - JSON array of keys, as produced by `page_codec::page`
    /// * `key_count` - Number of keys in the page
    /// * `recipient_public_key` - Public key of the invited/accepted user
    async fn prepare_keys_for_new_member(
        &self,
        page_payload: &str,
        key_count: usize,
        recipient_public_key: &str,
    ) -> GroupResult<String>;

    /// Prepare a rotation starting from the newest key
    async fn prepare_rotation(&self, latest: &GroupKey, public_key: &str) -> GroupResult<RotationArtifact>;

    /// Derive the rotated key generation from its pre-key and the server output
    async fn derive_rotated_key(
        &self,
        pre_key: &GroupKey,
        output: &RotationOutput,
        user: &UserContext,
    ) -> GroupResult<GroupKey>;
}
