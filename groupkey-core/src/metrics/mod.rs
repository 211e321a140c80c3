/*
    Metrics - key lifecycle counters and histograms

    Covers:
    - Key history growth (appends, fetch calls)
    - Membership transfers (page uploads)
    - Rotation catch-up (outputs, rounds, finish outcomes)

    Recording is a no-op until the host installs a recorder.
*/

use metrics::{counter, describe_counter, describe_histogram, histogram};

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    describe_counter!(
        "groupkey_keys_appended_total",
        "Total number of key generations appended to local key stores"
    );

    describe_counter!(
        "groupkey_key_fetch_calls_total",
        "Total number of fetch requests sent to the key server"
    );

    describe_histogram!(
        "groupkey_key_fetch_batch_size",
        "Number of keys returned by a single fetch request"
    );

    describe_counter!(
        "groupkey_page_uploads_total",
        "Total number of follow-up key pages uploaded, labeled by result (success, failed)"
    );

    describe_counter!(
        "groupkey_rotation_outputs_total",
        "Total number of pending rotation outputs processed, labeled by result (resolved, deferred, failed)"
    );

    describe_histogram!(
        "groupkey_rotation_rounds",
        "Number of catch-up rounds used by a finished rotation"
    );

    describe_counter!(
        "groupkey_rotation_finish_total",
        "Total number of rotation finish runs, labeled by outcome (noop, completed, incomplete)"
    );
}

/// Record keys appended to a key store
pub fn keys_appended(count: usize) {
    counter!("groupkey_keys_appended_total").increment(count as u64);
}

/// Record one fetch request and the size of its batch
pub fn key_fetch_call(batch_size: usize) {
    counter!("groupkey_key_fetch_calls_total").increment(1);
    histogram!("groupkey_key_fetch_batch_size").record(batch_size as f64);
}

/// Record a follow-up page upload
pub fn page_upload(result: &str) {
    counter!("groupkey_page_uploads_total", "result" => result.to_string()).increment(1);
}

/// Record a rotation output being resolved or deferred
pub fn rotation_output(result: &str) {
    counter!("groupkey_rotation_outputs_total", "result" => result.to_string()).increment(1);
}

/// Record the rounds a finish run used
pub fn rotation_rounds(rounds: u32) {
    histogram!("groupkey_rotation_rounds").record(f64::from(rounds));
}

/// Record a finish run outcome
pub fn rotation_finished(outcome: &str) {
    counter!("groupkey_rotation_finish_total", "outcome" => outcome.to_string()).increment(1);
}
