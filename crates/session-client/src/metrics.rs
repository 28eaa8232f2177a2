//! Session client metrics
//!
//! Counters emitted through the `metrics` facade. Without an installed
//! recorder they are no-ops; the embedding application chooses the exporter.
//!
//! - `session_handshakes_total` (counter): label `outcome`
//! - `session_calls_total` (counter): labels `endpoint`, `outcome`
//! - `session_auth_retries_total` (counter): label `endpoint`

/// Record a completed handshake attempt (`success` or `failure`).
pub fn record_handshake(outcome: &'static str) {
    metrics::counter!("session_handshakes_total", "outcome" => outcome).increment(1);
}

/// Record a finished call with its final outcome.
pub fn record_call(endpoint: &str, outcome: &'static str) {
    metrics::counter!(
        "session_calls_total",
        "endpoint" => endpoint.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a re-handshake-and-retry triggered by an auth failure.
pub fn record_auth_retry(endpoint: &str) {
    metrics::counter!("session_auth_retries_total", "endpoint" => endpoint.to_string())
        .increment(1);
}
