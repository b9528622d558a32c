//! # parley-settings
//!
//! Layered configuration for the Parley relay.
//!
//! Settings are resolved in three layers (later wins):
//! 1. **Compiled defaults** ([`ParleySettings::default()`])
//! 2. **Settings file** (`$PARLEY_CONFIG` or `~/.parley/settings.json`), deep-merged
//! 3. **Environment variables** (`PARLEY_*`)
//!
//! The result is validated before it is handed out.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_from, deep_merge, load_file_layer, load_settings,
    load_settings_from_path, settings_path,
};
pub use types::*;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let s = ParleySettings::default();
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.server.port, 8081);
        assert_eq!(s.server.max_message_size, 1024 * 1024);
        assert_eq!(s.connection.queue_capacity, 50);
        assert_eq!(s.heartbeat.initial_delay_secs, 3);
        assert_eq!(s.heartbeat.sweep_period_secs, 30);
        assert_eq!(s.heartbeat.max_idle_secs, 60);
        assert_eq!(s.history.direct_ttl_secs, 4 * 3600);
        assert_eq!(s.history.group_ttl_secs, 4 * 3600);
        assert_eq!(s.history.assistant_ttl_secs, 3 * 3600);
        assert!(!s.mirror.enabled);
        assert_eq!(s.mirror.target_host, "192.168.0.255");
        assert_eq!(s.mirror.port, 3001);
        assert_eq!(s.logging.level, "info");
        assert!(s.groups.is_empty());
    }

    #[test]
    fn settings_roundtrip_through_json() {
        let json = serde_json::to_value(ParleySettings::default()).unwrap();
        assert_eq!(json["connection"]["queueCapacity"], 50);
        assert_eq!(json["logging"]["format"], "compact");
        let back: ParleySettings = serde_json::from_value(json).unwrap();
        assert_eq!(back.server.port, 8081);
    }
}
