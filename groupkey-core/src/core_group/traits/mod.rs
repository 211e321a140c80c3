//! Collaborator trait boundaries
//!
//! The engine never talks to a network, a crypto library or a database
//! directly. Each is injected as a trait object:
//! - [`GroupGateway`]: authenticated requests to the key server
//! - [`GroupCrypto`]: re-encryption and key derivation
//! - [`GroupStore`]: local key-value persistence
//!
//! In-memory implementations live in `core_group::providers`.

pub mod crypto;
pub mod gateway;
pub mod storage;

pub use crypto::GroupCrypto;
pub use gateway::GroupGateway;
pub use storage::{group_data_key, load_group_data, save_group_data, GroupStore};
