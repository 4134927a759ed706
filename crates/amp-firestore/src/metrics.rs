//! Firestore and ledger metrics.

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Total Firestore requests by operation and status.
    pub const REQUESTS_TOTAL: &str = "firestore_requests_total";

    /// Request latency in seconds by operation.
    pub const LATENCY_SECONDS: &str = "firestore_latency_seconds";

    /// Total retry attempts by operation.
    pub const RETRIES_TOTAL: &str = "firestore_retries_total";

    /// Optimistic-concurrency conflicts on ledger mutations.
    pub const LEDGER_CONFLICTS_TOTAL: &str = "ledger_conflicts_total";

    /// Ledger mutations by operation and outcome.
    pub const LEDGER_MUTATIONS_TOTAL: &str = "ledger_mutations_total";
}

/// Record metrics for a completed Firestore request.
pub fn record_request(operation: &str, status: u16, latency_ms: f64) {
    counter!(
        names::REQUESTS_TOTAL,
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(names::LATENCY_SECONDS, "operation" => operation.to_string())
        .record(latency_ms / 1000.0);
}

/// Record a transport-level retry.
pub fn record_retry(operation: &str) {
    counter!(names::RETRIES_TOTAL, "operation" => operation.to_string()).increment(1);
}

/// Record a lost optimistic-concurrency race.
pub fn record_conflict(operation: &'static str) {
    counter!(names::LEDGER_CONFLICTS_TOTAL, "operation" => operation).increment(1);
}

/// Record the outcome of a ledger mutation.
pub fn record_mutation(operation: &'static str, outcome: &'static str) {
    counter!(
        names::LEDGER_MUTATIONS_TOTAL,
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
}
