//! Group key lifecycle
//!
//! Client-side management of a group's key history:
//! - Ordered, indexed key storage
//! - Paged transfer of the history to new members
//! - Pending join requests
//! - Key rotation with out-of-order catch-up
//!
//! ## Core Components
//!
//! - `KeyStore`: append-only key history with an id index
//! - `page_codec`: key history pagination
//! - `MembershipSession`: multi-page invite/accept transfers
//! - `JoinRequestManager`: list, accept and reject join requests
//! - `RotationCoordinator`: prepare, publish and finish rotations
//! - `Group`: facade tying the above to one group's data
//!
//! ## Invariants
//!
//! - Key times are non-decreasing and ids unique within a history
//! - The id index always maps each key id to its position
//! - A finish run ends after at most `rotation.max_rounds` rounds

// Core types and errors
pub mod errors;
pub mod types;

// Trait boundaries and in-memory providers
pub mod providers;
pub mod traits;

pub mod fetch;
pub mod group;
pub mod join_requests;
pub mod key_store;
pub mod membership;
pub mod page_codec;
pub mod registry;
pub mod rotation;

// Testing modules
#[cfg(test)]
#[path = "tests/membership_scenarios.rs"]
mod membership_scenarios;
#[cfg(test)]
#[path = "tests/rotation_scenarios.rs"]
mod rotation_scenarios;

pub use errors::{GroupError, GroupResult};
pub use group::{Group, GroupContext, JoinRequests};
pub use join_requests::JoinRequestManager;
pub use key_store::KeyStore;
pub use membership::{MembershipKind, MembershipReport, MembershipSession, PageOutcome, SessionState};
pub use page_codec::{KeyPage, PageBoundary};
pub use registry::{GroupHandle, GroupRegistry};
pub use rotation::{FinishOutcome, RotationCoordinator, RotationState};
pub use types::{
    GroupData, GroupId, GroupKey, GroupKeyId, JoinRequest, KeyCursor, RotationArtifact, RotationOutput, UserContext,
    UserId,
};
