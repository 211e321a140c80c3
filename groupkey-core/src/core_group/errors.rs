//! Error types for group key operations

use thiserror::Error;

/// Result type for group key operations
pub type GroupResult<T> = Result<T, GroupError>;

/// Errors that can occur while managing group keys
#[derive(Debug, Error)]
pub enum GroupError {
    /// Caller's rank does not meet the threshold for the action
    #[error("Permission denied: rank {rank} cannot {action} (requires rank <= {required})")]
    PermissionDenied { action: &'static str, rank: u32, required: u32 },

    /// Group has no keys; a loaded group always has at least one
    #[error("Key store is empty")]
    EmptyStore,

    /// Appended key id already present in the key store
    #[error("Duplicate group key id: {0}")]
    DuplicateKeyId(String),

    /// Appended key is older than the newest stored key
    #[error("Key {key_id} at time {time} is older than latest key time {latest}")]
    KeyOutOfOrder { key_id: String, time: u64, latest: u64 },

    /// One or more pages of a membership session failed to upload
    #[error("Partial upload failure in session {session_id}: pages {failed_pages:?} of {total_pages} failed")]
    PartialUploadFailure { session_id: String, failed_pages: Vec<usize>, total_pages: usize },

    /// Finish loop ran out of rounds with rotation outputs left
    #[error("Key rotation incomplete: {unresolved} outputs unresolved after {rounds} rounds")]
    RotationIncomplete { unresolved: usize, rounds: u32 },

    /// Pages must hold at least one key
    #[error("Invalid page size: must be at least 1")]
    InvalidPageSize,

    /// Rotation state machine used out of order
    #[error("Invalid rotation state: expected {expected}, got {actual}")]
    InvalidState { expected: &'static str, actual: &'static str },

    /// Operation exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Group data not present in the store
    #[error("Group not found: {0}")]
    GroupNotFound(String),

    /// Gateway (network) failure
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// Crypto engine failure
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Local store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for GroupError {
    fn from(e: serde_json::Error) -> Self {
        GroupError::Serialization(e.to_string())
    }
}
