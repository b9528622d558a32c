//! Settings loading: compiled defaults, JSON file, then environment.
//!
//! Loading flow:
//! 1. Serialize [`ParleySettings::default()`] to JSON
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Deserialize, apply `PARLEY_*` overrides, then [`ParleySettings::validate`]
//!
//! Deep merge rules:
//! - Objects are merged recursively (source wins per key)
//! - Arrays and primitives are replaced entirely
//! - Null values in the source are skipped

use std::path::{Path, PathBuf};

use parley_logging::LogFormat;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::ParleySettings;

/// Default settings file location: `$PARLEY_CONFIG`, else `~/.parley/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(explicit) = std::env::var_os("PARLEY_CONFIG").filter(|v| !v.is_empty()) {
        return PathBuf::from(explicit);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".parley").join("settings.json")
}

/// Load settings from [`settings_path`].
pub fn load_settings() -> Result<ParleySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path`, apply env overrides and validate.
///
/// A missing file yields the defaults. Unparseable JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ParleySettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides or validation.
pub fn load_file_layer(path: &Path) -> Result<ParleySettings> {
    let defaults = serde_json::to_value(ParleySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| parse_error(path, source))?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    serde_json::from_value(merged).map_err(|source| parse_error(path, source))
}

fn parse_error(path: &Path, source: serde_json::Error) -> SettingsError {
    SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    }
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `PARLEY_*` environment overrides.
///
/// Invalid values are logged and ignored.
pub fn apply_env_overrides(settings: &mut ParleySettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup` (env var name to raw value).
pub fn apply_overrides_from<F>(settings: &mut ParleySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("PARLEY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("PARLEY_PORT", 1, 65535) {
        settings.server.port = v;
    }

    // ── Connection / heartbeat ──────────────────────────────────────
    if let Some(v) = env.usize("PARLEY_QUEUE_CAPACITY", 1, 1_000_000) {
        settings.connection.queue_capacity = v;
    }
    if let Some(v) = env.u64("PARLEY_SWEEP_DELAY_SECS", 0, 86_400) {
        settings.heartbeat.initial_delay_secs = v;
    }
    if let Some(v) = env.u64("PARLEY_SWEEP_PERIOD_SECS", 1, 86_400) {
        settings.heartbeat.sweep_period_secs = v;
    }
    if let Some(v) = env.u64("PARLEY_HEARTBEAT_MAX_IDLE_SECS", 1, 86_400) {
        settings.heartbeat.max_idle_secs = v;
    }

    // ── Mirror ──────────────────────────────────────────────────────
    if let Some(v) = env.bool("PARLEY_MIRROR_ENABLED") {
        settings.mirror.enabled = v;
    }
    if let Some(v) = env.u16("PARLEY_MIRROR_PORT", 1, 65535) {
        settings.mirror.port = v;
    }
    if let Some(v) = env.string("PARLEY_MIRROR_TARGET") {
        settings.mirror.target_host = v;
    }

    // ── Auth / logging ──────────────────────────────────────────────
    if let Some(v) = env.string("PARLEY_JWT_SECRET") {
        settings.auth.jwt_secret = v;
    }
    if let Some(v) = env.string("PARLEY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.string("PARLEY_LOG_FORMAT") {
        match LogFormat::parse(&v) {
            Some(format) => settings.logging.format = format,
            None => warn!(key = "PARLEY_LOG_FORMAT", value = %v, "invalid log format, ignoring"),
        }
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a boolean: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`, any case.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a `u16` within `min..=max`.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a `u64` within `min..=max`.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a `usize` within `min..=max`.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

// ── Env readers ─────────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn checked<T>(&self, name: &str, kind: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(val.trim());
        if result.is_none() {
            warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.checked(name, "bool", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.checked(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.checked(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.checked(name, "usize", |v| parse_usize_range(v, min, max))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;
    use crate::errors::SettingsError;

    fn overrides(pairs: &[(&str, &str)]) -> ParleySettings {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let mut settings = ParleySettings::default();
        apply_overrides_from(&mut settings, |name| map.get(name).cloned());
        settings
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"heartbeat": {"maxIdleSecs": 60, "sweepPeriodSecs": 30}});
        let source = serde_json::json!({"heartbeat": {"maxIdleSecs": 90}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["heartbeat"]["maxIdleSecs"], 90);
        assert_eq!(merged["heartbeat"]["sweepPeriodSecs"], 30);
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replaces() {
        let merged = deep_merge(
            serde_json::json!({"groups": {"1": [1, 2, 3]}}),
            serde_json::json!({"groups": {"1": [4]}}),
        );
        assert_eq!(merged["groups"]["1"], serde_json::json!([4]));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let merged = deep_merge(serde_json::json!({"a": {"b": 1}}), serde_json::json!({"a": 2}));
        assert_eq!(merged["a"], 2);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn missing_file_yields_defaults() {
        let settings = load_file_layer(Path::new("/nonexistent/parley.json")).unwrap();
        assert_eq!(settings.server.port, 8081);
        assert_eq!(settings.connection.queue_capacity, 50);
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9000}, "history": {"groupTtlSecs": 60}, "groups": {"5": [1, 2]}}"#,
        )
        .unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.history.group_ttl_secs, 60);
        assert_eq!(settings.history.direct_ttl_secs, 4 * 3600);
        assert_eq!(settings.groups.get(&5), Some(&vec![1, 2]));
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();
        assert_matches!(load_file_layer(&path), Err(SettingsError::Parse { .. }));
    }

    #[test]
    fn wrongly_typed_value_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": "eighty"}}"#).unwrap();
        assert_matches!(
            load_file_layer(&path),
            Err(SettingsError::Parse { path: p, .. }) if p == path
        );
    }

    #[test]
    fn zero_capacity_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"connection": {"queueCapacity": 0}}"#).unwrap();
        assert_matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue {
                field: "connection.queueCapacity",
                ..
            })
        );
    }

    #[test]
    fn file_without_secret_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 9000}}"#).unwrap();
        assert_matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue {
                field: "auth.jwtSecret",
                ..
            })
        );

        std::fs::write(&path, r#"{"auth": {"jwtSecret": "rotated-in-prod"}}"#).unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        assert!(!settings.auth.uses_dev_secret());
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let s = overrides(&[
            ("PARLEY_HOST", "127.0.0.1"),
            ("PARLEY_PORT", "9100"),
            ("PARLEY_QUEUE_CAPACITY", "8"),
            ("PARLEY_SWEEP_DELAY_SECS", "0"),
            ("PARLEY_SWEEP_PERIOD_SECS", "5"),
            ("PARLEY_HEARTBEAT_MAX_IDLE_SECS", "15"),
            ("PARLEY_MIRROR_ENABLED", "yes"),
            ("PARLEY_MIRROR_PORT", "4000"),
            ("PARLEY_MIRROR_TARGET", "10.0.0.255"),
            ("PARLEY_JWT_SECRET", "s3cret"),
            ("PARLEY_LOG_LEVEL", "debug"),
            ("PARLEY_LOG_FORMAT", "json"),
        ]);
        assert_eq!(s.server.host, "127.0.0.1");
        assert_eq!(s.server.port, 9100);
        assert_eq!(s.connection.queue_capacity, 8);
        assert_eq!(s.heartbeat.initial_delay_secs, 0);
        assert_eq!(s.heartbeat.sweep_period_secs, 5);
        assert_eq!(s.heartbeat.max_idle_secs, 15);
        assert!(s.mirror.enabled);
        assert_eq!(s.mirror.port, 4000);
        assert_eq!(s.mirror.target_host, "10.0.0.255");
        assert_eq!(s.auth.jwt_secret, "s3cret");
        assert_eq!(s.logging.level, "debug");
        assert_eq!(s.logging.format, LogFormat::Json);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let s = overrides(&[
            ("PARLEY_PORT", "0"),
            ("PARLEY_QUEUE_CAPACITY", "lots"),
            ("PARLEY_SWEEP_PERIOD_SECS", "0"),
            ("PARLEY_MIRROR_ENABLED", "maybe"),
            ("PARLEY_HOST", ""),
            ("PARLEY_LOG_FORMAT", "fancy"),
        ]);
        let defaults = ParleySettings::default();
        assert_eq!(s.server.port, defaults.server.port);
        assert_eq!(s.connection.queue_capacity, defaults.connection.queue_capacity);
        assert_eq!(s.heartbeat.sweep_period_secs, defaults.heartbeat.sweep_period_secs);
        assert!(!s.mirror.enabled);
        assert_eq!(s.server.host, defaults.server.host);
        assert_eq!(s.logging.format, LogFormat::Compact);
    }

    // ── parse helpers ───────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in ["true", "1", "YES", "On"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in ["false", "0", "no", "OFF"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("65535", 1, 65535), Some(65535));
        assert_eq!(parse_u16_range("99999", 1, 65535), None);
        assert_eq!(parse_u64_range("0", 1, 10), None);
        assert_eq!(parse_u64_range("10", 1, 10), Some(10));
        assert_eq!(parse_usize_range("-1", 0, 10), None);
    }
}
