//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Call once at startup before anything is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

// Metric names, shared by every module that records.

/// Connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Connections torn down (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Live connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Handshakes rejected by authentication (counter).
pub const WS_HANDSHAKE_REJECTED_TOTAL: &str = "ws_handshake_rejected_total";
/// Connections force-closed because the same user reconnected (counter).
pub const WS_DISPLACED_TOTAL: &str = "ws_displaced_total";
/// Frames dropped on a full outbound queue (counter).
pub const WS_OUTBOUND_DROPS_TOTAL: &str = "ws_outbound_drops_total";
/// Inbound frames that failed to decode (counter).
pub const WS_DECODE_FAILURES_TOTAL: &str = "ws_decode_failures_total";
/// Data frames routed (counter, labels: kind).
pub const MESSAGES_ROUTED_TOTAL: &str = "messages_routed_total";
/// Per-recipient delivery outcomes (counter, labels: outcome).
pub const DELIVERIES_TOTAL: &str = "deliveries_total";
/// Group membership lookups that failed (counter).
pub const MEMBERSHIP_ERRORS_TOTAL: &str = "membership_errors_total";
/// History appends (counter).
pub const HISTORY_APPENDS_TOTAL: &str = "history_appends_total";
/// History append or read failures (counter).
pub const HISTORY_ERRORS_TOTAL: &str = "history_errors_total";
/// Connections evicted by the idle sweep (counter).
pub const SWEEP_EVICTIONS_TOTAL: &str = "sweep_evictions_total";
/// Evictions that failed (counter).
pub const SWEEP_FAILURES_TOTAL: &str = "sweep_failures_total";
/// Frames published to the LAN mirror (counter).
pub const MIRROR_PUBLISHED_TOTAL: &str = "mirror_published_total";
/// Frames received from other nodes over the mirror (counter).
pub const MIRROR_RECEIVED_TOTAL: &str = "mirror_received_total";
/// Mirror send/receive failures (counter).
pub const MIRROR_ERRORS_TOTAL: &str = "mirror_errors_total";
