//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use crate::mirror::BroadcastMirror;
use crate::websocket::registry::Registry;

/// Relay lifecycle as seen by load balancers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayStatus {
    /// Accepting handshakes.
    Ok,
    /// Shutdown has begun; new handshakes are refused.
    Draining,
}

/// Mirror participation.
#[derive(Debug, Clone, Serialize)]
pub struct MirrorStatus {
    /// Whether frames are published to the LAN.
    pub enabled: bool,
    /// Origin id on published packets, when enabled.
    pub node_id: Option<Uuid>,
}

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `ok` or `draining`.
    pub status: RelayStatus,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Users with a registered connection.
    pub connections: usize,
    /// LAN mirror state.
    pub mirror: MirrorStatus,
}

impl HealthResponse {
    /// Read the live counters.
    pub fn snapshot(
        started: Instant,
        registry: &dyn Registry,
        mirror: &BroadcastMirror,
        draining: bool,
    ) -> Self {
        let enabled = mirror.is_enabled();
        Self {
            status: if draining {
                RelayStatus::Draining
            } else {
                RelayStatus::Ok
            },
            uptime_secs: started.elapsed().as_secs(),
            connections: registry.len(),
            mirror: MirrorStatus {
                enabled,
                node_id: enabled.then(|| mirror.node_id()),
            },
        }
    }
}
