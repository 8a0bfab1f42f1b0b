//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define server metrics (connections, handshakes, frames, closes)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `ws_connections_active` (gauge): sessions currently registered
//! - `ws_handshakes_total` (counter): upgrades by `result` (accepted or a rejection reason)
//! - `ws_frames_received_total` (counter): inbound frames by `opcode`
//! - `ws_messages_received_total` (counter): reassembled messages by `kind`
//! - `ws_broadcast_failures_total` (counter): per-recipient broadcast failures
//! - `ws_sessions_closed_total` (counter): finished sessions by `outcome`
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so library users
//!   and tests pay nothing
//! - Label values are static strings; connection ids are never labels

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
pub const WS_HANDSHAKES_TOTAL: &str = "ws_handshakes_total";
pub const WS_FRAMES_RECEIVED_TOTAL: &str = "ws_frames_received_total";
pub const WS_MESSAGES_RECEIVED_TOTAL: &str = "ws_messages_received_total";
pub const WS_BROADCAST_FAILURES_TOTAL: &str = "ws_broadcast_failures_total";
pub const WS_SESSIONS_CLOSED_TOTAL: &str = "ws_sessions_closed_total";

/// Install the global Prometheus recorder with a scrape endpoint on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus metrics endpoint started");
    Ok(())
}

pub fn record_handshake(result: &'static str) {
    metrics::counter!(WS_HANDSHAKES_TOTAL, "result" => result).increment(1);
}

pub fn record_frame(opcode: &'static str) {
    metrics::counter!(WS_FRAMES_RECEIVED_TOTAL, "opcode" => opcode).increment(1);
}

pub fn record_message(kind: &'static str) {
    metrics::counter!(WS_MESSAGES_RECEIVED_TOTAL, "kind" => kind).increment(1);
}

pub fn record_broadcast_failures(count: usize) {
    if count > 0 {
        metrics::counter!(WS_BROADCAST_FAILURES_TOTAL).increment(count as u64);
    }
}

pub fn record_session_opened() {
    metrics::gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
}

pub fn record_session_closed(outcome: &'static str) {
    metrics::gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    metrics::counter!(WS_SESSIONS_CLOSED_TOTAL, "outcome" => outcome).increment(1);
}
