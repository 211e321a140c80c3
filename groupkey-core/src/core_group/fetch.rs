//! Fetch-direction pagination
//!
//! The server answers a fetch with the keys after a cursor. A batch longer
//! than the threshold means more keys are waiting; anything at or below it
//! ends the loop.

use super::errors::GroupResult;
use super::key_store::KeyStore;
use super::traits::GroupGateway;
use super::types::GroupKey;
use crate::metrics;
use tracing::{debug, warn};

/// Fetch every key newer than the newest local key and append it.
///
/// Keys the store already holds are skipped. Returns the number of keys
/// appended.
pub async fn fetch_new_keys(
    gateway: &dyn GroupGateway,
    jwt: &str,
    group_id: &str,
    store: &mut KeyStore,
    batch_threshold: usize,
) -> GroupResult<usize> {
    let mut cursor = store.cursor()?;
    let mut fetched: Vec<GroupKey> = Vec::new();
    let mut calls = 0usize;

    loop {
        let batch = gateway.fetch_keys(jwt, group_id, &cursor).await?;
        calls += 1;
        metrics::key_fetch_call(batch.len());

        let has_more = batch.len() > batch_threshold;
        debug!(group_id, call = calls, batch = batch.len(), has_more, "Fetched key batch");

        match batch.last() {
            Some(last) => cursor = last.cursor(),
            None => break,
        }
        fetched.extend(batch);

        if !has_more {
            break;
        }
    }

    let before = fetched.len();
    fetched.retain(|key| !store.contains(&key.group_key_id));
    if fetched.len() < before {
        warn!(group_id, skipped = before - fetched.len(), "Server returned already known keys");
    }

    store.append(fetched)
}
