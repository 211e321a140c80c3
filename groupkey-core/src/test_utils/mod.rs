//! Test utilities and fixtures
//!
//! Deterministic key histories, group data and users shared by unit tests,
//! integration tests and the CLI simulator.

use crate::core_group::types::{GroupData, GroupKey, RotationOutput, UserContext};

/// Key with predictable material derived from its id
pub fn make_key(id: &str, time: u64) -> GroupKey {
    GroupKey {
        group_key_id: id.to_string(),
        group_key: format!("{}-secret", id),
        private_group_key: format!("{}-private", id),
        public_group_key: format!("{}-public", id),
        time,
    }
}

/// History of `n` keys with ids `key-0..key-{n-1}` and time equal to the index
pub fn make_keys(n: usize) -> Vec<GroupKey> {
    (0..n).map(|i| make_key(&format!("key-{}", i), i as u64)).collect()
}

/// Group holding `n` keys, with the caller at `rank`
pub fn make_group(group_id: &str, rank: u32, n: usize) -> GroupData {
    GroupData::new(group_id, rank, make_keys(n)).unwrap_or_else(|e| panic!("fixture keys rejected: {}", e))
}

/// Acting user for tests
pub fn test_user() -> UserContext {
    UserContext::new("alice", "alice-public", "alice-private", "alice-jwt")
}

/// Rotation output starting from `pre_key_id`
pub fn rotation_output(pre_key_id: &str, server_output: &str) -> RotationOutput {
    RotationOutput { pre_group_key_id: pre_key_id.to_string(), server_output: server_output.to_string() }
}
