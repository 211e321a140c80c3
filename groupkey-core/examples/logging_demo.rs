//! Example demonstrating logging around a key rotation
//!
//! Run with:
//! ```bash
//! cargo run --example logging_demo
//! ```

use groupkey_core::config::Config;
use groupkey_core::core_group::providers::{MemoryGroupStore, MockGroupCrypto, MockGroupGateway};
use groupkey_core::core_group::{Group, GroupContext, GroupData, RotationOutput, UserContext};
use groupkey_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use groupkey_core::test_utils::make_keys;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Debug level shows every finish round
    let config = LogConfig::new(LogLevel::Debug).with_timestamp(true).with_target(true);

    init_logging_with_config(config).expect("Failed to initialize logging");

    let gateway = Arc::new(MockGroupGateway::with_keys(make_keys(4)));
    let ctx = GroupContext::new(
        gateway.clone(),
        Arc::new(MockGroupCrypto::new()),
        Arc::new(MemoryGroupStore::new()),
        Arc::new(Config::default()),
    );
    let data = GroupData::new("demo", 0, make_keys(2)).expect("Failed to build group");
    let mut group = Group::new(data, UserContext::new("alice", "pk", "sk", "jwt"), ctx);

    gateway.push_rotation_output(RotationOutput {
        pre_group_key_id: "key-3".to_string(),
        server_output: "demo-output".to_string(),
    });

    match group.finish_rotation().await {
        Ok(outcome) => info!(rounds = outcome.rounds(), resolved = outcome.resolved(), "Rotation finished"),
        Err(e) => error!(error = %e, "Rotation failed"),
    }
}
