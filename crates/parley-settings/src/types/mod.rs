//! Settings types.
//!
//! Every struct is `#[serde(default)]` with `camelCase` keys, so a user file
//! only needs the values it changes.

mod network;
mod retention;

use std::collections::BTreeMap;

pub use network::{
    AuthSettings, ConnectionSettings, DEV_JWT_SECRET, HeartbeatSettings, MirrorSettings,
    ServerSettings,
};
pub use parley_logging::LogFormat;
pub use retention::HistorySettings;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParleySettings {
    /// Listener.
    pub server: ServerSettings,
    /// Per-connection resources.
    pub connection: ConnectionSettings,
    /// Idle sweep.
    pub heartbeat: HeartbeatSettings,
    /// History retention.
    pub history: HistorySettings,
    /// LAN broadcast mirror.
    pub mirror: MirrorSettings,
    /// Token verification.
    pub auth: AuthSettings,
    /// Diagnostics.
    pub logging: LoggingSettings,
    /// Static group membership seed: group id to member user ids.
    pub groups: BTreeMap<i64, Vec<i64>>,
}

/// Log output.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

impl ParleySettings {
    /// Reject values that would leave a subsystem unable to run.
    pub fn validate(&self) -> Result<()> {
        let checks: [(&'static str, bool); 8] = [
            ("connection.queueCapacity", self.connection.queue_capacity > 0),
            ("heartbeat.sweepPeriodSecs", self.heartbeat.sweep_period_secs > 0),
            ("heartbeat.maxIdleSecs", self.heartbeat.max_idle_secs > 0),
            ("history.purgeIntervalSecs", self.history.purge_interval_secs > 0),
            ("history.directTtlSecs", self.history.direct_ttl_secs > 0),
            ("history.groupTtlSecs", self.history.group_ttl_secs > 0),
            ("history.assistantTtlSecs", self.history.assistant_ttl_secs > 0),
            ("server.maxMessageSize", self.server.max_message_size > 0),
        ];
        if let Some(&(name, _)) = checks.iter().find(|(_, ok)| !ok) {
            return Err(SettingsError::invalid(name, "must be > 0"));
        }
        if self.mirror.enabled {
            if self.mirror.channel_capacity == 0 {
                return Err(SettingsError::invalid("mirror.channelCapacity", "must be > 0"));
            }
            if self.mirror.max_datagram_bytes == 0 || self.mirror.max_datagram_bytes > 65_507 {
                return Err(SettingsError::invalid(
                    "mirror.maxDatagramBytes",
                    "must be within 1..=65507",
                ));
            }
        }
        if self.auth.jwt_secret.is_empty() {
            return Err(SettingsError::invalid("auth.jwtSecret", "must not be empty"));
        }
        if self.auth.uses_dev_secret() && !self.auth.allow_dev_secret {
            return Err(SettingsError::invalid(
                "auth.jwtSecret",
                "must be set; the built-in development secret needs auth.allowDevSecret",
            ));
        }
        Ok(())
    }
}
