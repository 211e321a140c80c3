//! In-memory collaborator implementations
//!
//! Used by the test suites and the CLI simulator. None of these perform
//! real cryptography or networking.

pub mod memory_store;
pub mod mock_crypto;
pub mod mock_gateway;

pub use memory_store::MemoryGroupStore;
pub use mock_crypto::MockGroupCrypto;
pub use mock_gateway::{MockGroupGateway, RecordedPage, RecordedRequest};
