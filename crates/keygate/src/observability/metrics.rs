//! Metrics definitions for Keygate.
//!
//! All metrics follow Prometheus naming conventions:
//! - `keygate_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `command`: the five supported commands plus `other`
//! - `status`: `ok` or an error kind from `GatewayError::kind`
//! - `outcome`: `success`, `invalid_token`, `expired`, `insufficient_scope`
//! - `result`: `hit`, `miss`, `expired`
//!
//! Recording without an installed recorder is a no-op, so library code and
//! tests can call these freely.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus recorder and serve `/metrics` on `bind_address`.
///
/// Must be called from within a Tokio runtime, before any metrics are
/// recorded.
///
/// # Errors
///
/// Returns an error if the recorder is already installed or the listener
/// cannot be set up.
pub fn init_metrics_recorder(bind_address: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(bind_address)
        // Command handling is dominated by signature checks (~1ms) and
        // backend round trips
        .set_buckets_for_metric(
            Matcher::Full("keygate_command_duration_seconds".to_string()),
            &[
                0.0001, 0.0005, 0.001, 0.002, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set command duration buckets: {e}"))?
        .install()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Authentication Metrics
// ============================================================================

/// Metric: `keygate_auth_attempts_total`
/// Labels: `outcome`
pub fn record_auth_attempt(outcome: &'static str) {
    counter!("keygate_auth_attempts_total", "outcome" => outcome).increment(1);
}

/// Metric: `keygate_token_cache_lookups_total`
/// Labels: `result`
pub fn record_cache_lookup(result: &'static str) {
    counter!("keygate_token_cache_lookups_total", "result" => result).increment(1);
}

/// Metric: `keygate_token_cache_evictions_total`
pub fn record_cache_eviction() {
    counter!("keygate_token_cache_evictions_total").increment(1);
}

// ============================================================================
// Command Metrics
// ============================================================================

/// Record a handled command.
///
/// Metric: `keygate_commands_total`, `keygate_command_duration_seconds`
/// Labels: `command`, `status`
pub fn record_command(command: &str, status: &'static str, duration: Duration) {
    let command = normalize_command(command);

    histogram!("keygate_command_duration_seconds", "command" => command)
        .record(duration.as_secs_f64());

    counter!("keygate_commands_total",
        "command" => command,
        "status" => status
    )
    .increment(1);
}

/// Map a client-supplied command name onto a bounded label set.
fn normalize_command(command: &str) -> &'static str {
    match command.to_ascii_uppercase().as_str() {
        "PING" => "PING",
        "QUIT" => "QUIT",
        "AUTH" => "AUTH",
        "SET" => "SET",
        "GET" => "GET",
        _ => "other",
    }
}

// ============================================================================
// Connection Metrics
// ============================================================================

/// Metric: `keygate_connections_total`, `keygate_active_connections`
pub fn record_connection_opened() {
    counter!("keygate_connections_total").increment(1);
    gauge!("keygate_active_connections").increment(1.0);
}

/// Metric: `keygate_active_connections`
pub fn record_connection_closed() {
    gauge!("keygate_active_connections").decrement(1.0);
}
