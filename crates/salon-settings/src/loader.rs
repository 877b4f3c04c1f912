//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`SalonSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `SALON_*` environment variable overrides
//! 4. Validate values the server cannot run with
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::SalonSettings;

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

/// Resolve the path to the settings file (`~/.salon/settings.json`).
pub fn settings_path() -> PathBuf {
    home_dir().join(".salon").join("settings.json")
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None if path == "~" => home_dir(),
        None => PathBuf::from(path),
    }
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<SalonSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<SalonSettings> {
    let defaults = serde_json::to_value(SalonSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: SalonSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `SALON_*` environment variable overrides.
///
/// Invalid values are ignored with a warning, keeping the file/default value.
pub fn apply_env_overrides(settings: &mut SalonSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

fn apply_overrides_from(settings: &mut SalonSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("SALON_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("SALON_PORT").and_then(|v| checked("SALON_PORT", &v, parse_u16)) {
        settings.server.port = v;
    }
    if let Some(v) = read("SALON_MAX_MESSAGE_SIZE")
        .and_then(|v| checked("SALON_MAX_MESSAGE_SIZE", &v, |s| parse_usize_range(s, 1024, 16 * 1024 * 1024)))
    {
        settings.server.max_message_size = v;
    }
    if let Some(v) = read("SALON_DB_PATH") {
        settings.database.path = v;
    }
    if let Some(v) = read("SALON_PBKDF2_ITERATIONS")
        .and_then(|v| checked("SALON_PBKDF2_ITERATIONS", &v, |s| parse_u32_range(s, 1, 10_000_000)))
    {
        settings.auth.pbkdf2_iterations = v;
    }
    if let Some(v) = read("SALON_LOG_LEVEL").and_then(|v| checked("SALON_LOG_LEVEL", &v, parse_level)) {
        settings.logging.level = v;
    }
    if let Some(v) = read("SALON_LOG_JSON").and_then(|v| checked("SALON_LOG_JSON", &v, parse_bool)) {
        settings.logging.json = v;
    }
}

fn checked<T>(name: &str, value: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let result = parse(value);
    if result.is_none() {
        warn!(key = name, value = %value, "invalid env var, ignoring");
    }
    result
}

fn validate(settings: &SalonSettings) -> Result<()> {
    let server = &settings.server;
    if server.send_queue_capacity == 0 {
        return Err(SettingsError::InvalidValue(
            "server.sendQueueCapacity must be at least 1".into(),
        ));
    }
    if server.max_dropped_messages == 0 {
        return Err(SettingsError::InvalidValue(
            "server.maxDroppedMessages must be at least 1".into(),
        ));
    }
    if server.heartbeat_interval_secs == 0 {
        return Err(SettingsError::InvalidValue(
            "server.heartbeatIntervalSecs must be at least 1".into(),
        ));
    }
    if server.heartbeat_timeout_secs < server.heartbeat_interval_secs {
        return Err(SettingsError::InvalidValue(
            "server.heartbeatTimeoutSecs must not be shorter than the interval".into(),
        ));
    }
    if settings.auth.pbkdf2_iterations == 0 {
        return Err(SettingsError::InvalidValue(
            "auth.pbkdf2Iterations must be at least 1".into(),
        ));
    }
    Ok(())
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u16(val: &str) -> Option<u16> {
    val.parse().ok()
}

pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Accept a tracing level name, normalized to lowercase.
pub fn parse_level(val: &str) -> Option<String> {
    let lower = val.to_lowercase();
    matches!(lower.as_str(), "trace" | "debug" | "info" | "warn" | "error" | "off").then_some(lower)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8000, "host": "localhost"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "localhost");
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replace() {
        let merged = deep_merge(
            serde_json::json!({"items": [1, 2, 3]}),
            serde_json::json!({"items": [4]}),
        );
        assert_eq!(merged["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let merged = deep_merge(
            serde_json::json!({"a": {"nested": true}}),
            serde_json::json!({"a": 42}),
        );
        assert_eq!(merged["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.server.send_queue_capacity, 256);
        assert_eq!(settings.auth.pbkdf2_iterations, 600_000);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"sendQueueCapacity": 8}, "logging": {"moduleLevels": {"salon_server": "debug"}}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.server.send_queue_capacity, 8);
        assert_eq!(settings.server.max_dropped_messages, 100);
        assert_eq!(settings.logging.module_levels["salon_server"], "debug");
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::Json(_))
        ));
    }

    #[test]
    fn load_rejects_zero_queue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"sendQueueCapacity": 0}}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn load_rejects_timeout_shorter_than_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"heartbeatIntervalSecs": 30, "heartbeatTimeoutSecs": 5}}"#,
        )
        .unwrap();
        assert!(load_settings_from_path(&path).is_err());
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let mut settings = SalonSettings::default();
        apply_overrides_from(
            &mut settings,
            env(&[
                ("SALON_HOST", "0.0.0.0"),
                ("SALON_PORT", "9100"),
                ("SALON_DB_PATH", "/var/lib/salon.db"),
                ("SALON_LOG_LEVEL", "DEBUG"),
                ("SALON_LOG_JSON", "yes"),
                ("SALON_PBKDF2_ITERATIONS", "1000"),
                ("SALON_MAX_MESSAGE_SIZE", "4096"),
            ]),
        );
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.database.path, "/var/lib/salon.db");
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
        assert_eq!(settings.auth.pbkdf2_iterations, 1000);
        assert_eq!(settings.server.max_message_size, 4096);
    }

    #[test]
    fn invalid_env_values_ignored() {
        let mut settings = SalonSettings::default();
        apply_overrides_from(
            &mut settings,
            env(&[
                ("SALON_PORT", "99999"),
                ("SALON_LOG_LEVEL", "loud"),
                ("SALON_LOG_JSON", "maybe"),
                ("SALON_PBKDF2_ITERATIONS", "0"),
                ("SALON_MAX_MESSAGE_SIZE", "12"),
                ("SALON_HOST", ""),
            ]),
        );
        let defaults = SalonSettings::default();
        assert_eq!(settings.server.port, defaults.server.port);
        assert_eq!(settings.server.host, defaults.server.host);
        assert_eq!(settings.logging.level, "info");
        assert!(!settings.logging.json);
        assert_eq!(settings.auth.pbkdf2_iterations, 600_000);
        assert_eq!(settings.server.max_message_size, 64 * 1024);
    }

    // ── parsing helpers ─────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "TRUE", "1", "yes", "on"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "no", "Off"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u32_range("5", 1, 10), Some(5));
        assert_eq!(parse_u32_range("11", 1, 10), None);
        assert_eq!(parse_usize_range("-1", 0, 10), None);
        assert_eq!(parse_u16("65535"), Some(65535));
        assert_eq!(parse_u16("65536"), None);
    }

    #[test]
    fn expand_home_prefix() {
        let expanded = expand_home("~/.salon/salon.db");
        assert!(expanded.ends_with(".salon/salon.db"));
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert_eq!(expand_home("/abs/x.db"), PathBuf::from("/abs/x.db"));
        assert_eq!(expand_home("rel/x.db"), PathBuf::from("rel/x.db"));
    }
}
