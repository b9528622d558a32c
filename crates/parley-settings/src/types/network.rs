//! Listener, connection, heartbeat, mirror and auth settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// HTTP / WebSocket listener.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Largest accepted WebSocket message, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            max_message_size: 1024 * 1024,
        }
    }
}

/// Per-connection resources.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Outbound queue capacity; frames beyond it are dropped.
    pub queue_capacity: usize,
    /// How long a presence record survives without a refresh.
    pub presence_ttl_secs: u64,
}

impl ConnectionSettings {
    /// Presence TTL as a [`Duration`].
    pub fn presence_ttl(&self) -> Duration {
        Duration::from_secs(self.presence_ttl_secs)
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 50,
            presence_ttl_secs: 4 * 3600,
        }
    }
}

/// Idle-connection sweep.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// Delay before the first sweep.
    pub initial_delay_secs: u64,
    /// Time between sweeps.
    pub sweep_period_secs: u64,
    /// A connection silent for longer than this is evicted.
    pub max_idle_secs: u64,
}

impl HeartbeatSettings {
    /// Initial delay as a [`Duration`].
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    /// Sweep period as a [`Duration`].
    pub fn sweep_period(&self) -> Duration {
        Duration::from_secs(self.sweep_period_secs)
    }

    /// Idle threshold as a [`Duration`].
    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            initial_delay_secs: 3,
            sweep_period_secs: 30,
            max_idle_secs: 60,
        }
    }
}

/// LAN broadcast mirror.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MirrorSettings {
    /// Whether the mirror runs at all.
    pub enabled: bool,
    /// Local address the receive socket binds to.
    pub bind_host: String,
    /// Destination for published datagrams (usually the subnet broadcast address).
    pub target_host: String,
    /// UDP port used for both sending and receiving.
    pub port: u16,
    /// Capacity of the publish channel; publishers wait when it is full.
    pub channel_capacity: usize,
    /// Largest datagram sent or accepted.
    pub max_datagram_bytes: usize,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_host: "0.0.0.0".to_string(),
            target_host: "192.168.0.255".to_string(),
            port: 3001,
            channel_capacity: 1024,
            max_datagram_bytes: 65_507,
        }
    }
}

/// Compiled-in signing secret. Public, so only usable with
/// [`AuthSettings::allow_dev_secret`].
pub const DEV_JWT_SECRET: &str = "parley-dev-secret";

/// Token verification.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HS256 signing secret shared with the token issuer.
    pub jwt_secret: String,
    /// Allowed clock skew when checking `exp`.
    pub leeway_secs: u64,
    /// Accept [`DEV_JWT_SECRET`]. Anyone can mint tokens for it.
    pub allow_dev_secret: bool,
}

impl AuthSettings {
    /// Whether the signing secret is the public compiled-in one.
    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: DEV_JWT_SECRET.to_string(),
            leeway_secs: 60,
            allow_dev_secret: false,
        }
    }
}
