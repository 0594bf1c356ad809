//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`GodHandSettings::default()`]
//! 2. If `~/.godhand/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `GODHAND_*` environment overrides (highest priority)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::GodHandSettings;

/// `~/.godhand`, or `/tmp/.godhand` when `HOME` is unset.
pub fn settings_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".godhand")
}

pub fn settings_path() -> PathBuf {
    settings_dir().join("settings.json")
}

/// Resolve a configured path against [`settings_dir`] unless it is absolute.
pub fn resolve_path(configured: &str) -> PathBuf {
    let path = Path::new(configured);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        settings_dir().join(path)
    }
}

pub fn load_settings() -> Result<GodHandSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with env overrides applied.
///
/// A missing file yields defaults; a malformed one is an error.
pub fn load_settings_from_path(path: &Path) -> Result<GodHandSettings> {
    let defaults = serde_json::to_value(GodHandSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: GodHandSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, arrays and primitives are replaced, and nulls in
/// `source` are skipped.
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

/// Reject values that would leave the host unable to run.
pub fn validate(settings: &GodHandSettings) -> Result<()> {
    if settings.server.heartbeat_interval_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "server.heartbeatIntervalMs must be > 0".into(),
        ));
    }
    if settings.server.fallback_timeout_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "server.fallbackTimeoutMs must be > 0".into(),
        ));
    }
    if settings.compiler.connectives.iter().all(|c| c.trim().is_empty()) {
        return Err(SettingsError::InvalidValue(
            "compiler.connectives must name at least one marker".into(),
        ));
    }
    if !settings.client.server_url.starts_with("http://")
        && !settings.client.server_url.starts_with("https://")
    {
        return Err(SettingsError::InvalidValue(format!(
            "client.serverUrl must be http(s): {}",
            settings.client.server_url
        )));
    }
    Ok(())
}

/// Apply `GODHAND_*` overrides. Unparseable values are logged and ignored.
pub fn apply_env_overrides(settings: &mut GodHandSettings) {
    if let Some(v) = read_env_string("GODHAND_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u64("GODHAND_PORT", 0, 65_535) {
        settings.server.port = v as u16;
    }
    if let Some(v) = read_env_u64("GODHAND_HEARTBEAT_INTERVAL_MS", 1_000, 600_000) {
        settings.server.heartbeat_interval_ms = v;
    }
    if let Some(v) = read_env_u64("GODHAND_FALLBACK_TIMEOUT_MS", 100, 3_600_000) {
        settings.server.fallback_timeout_ms = v;
    }
    if let Some(v) = read_env_bool("GODHAND_PERSIST_ON_CLOSE") {
        settings.server.persist_on_close = v;
    }

    if let Some(v) = read_env_usize("GODHAND_HISTORY_LIMIT", 1, 1_000_000) {
        settings.session.history_limit = Some(v);
    }
    if let Some(v) = read_env_usize("GODHAND_EVENT_LOG_LIMIT", 1, 10_000_000) {
        settings.session.event_log_limit = Some(v);
    }

    if let Some(v) = read_env_u64("GODHAND_RETRY_BOUND", 0, 20) {
        settings.executor.retry_bound = v as u32;
    }
    if let Some(v) = read_env_u64("GODHAND_RETRY_DELAY_MS", 0, 60_000) {
        settings.executor.retry_delay_ms = v;
    }

    if let Some(v) = read_env_string("GODHAND_SERVER_URL") {
        settings.client.server_url = v;
    }
    if let Some(v) = read_env_u64("GODHAND_MAX_RECONNECTS", 0, 100) {
        settings.client.max_reconnects = v as u32;
    }
    if let Some(v) = read_env_u64("GODHAND_RECONNECT_DELAY_MS", 0, 600_000) {
        settings.client.reconnect_delay_ms = v;
    }

    if let Some(v) = read_env_string("GODHAND_DB_PATH") {
        settings.store.db_path = v;
    }
    if let Some(v) = read_env_string("GODHAND_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("GODHAND_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Accepts `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`, case-insensitive.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8000, "host": "127.0.0.1"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "127.0.0.1");
    }

    #[test]
    fn merge_skips_null_and_replaces_arrays() {
        let target = serde_json::json!({"a": 1, "list": ["x", "y"]});
        let source = serde_json::json!({"a": null, "list": ["z"]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["list"], serde_json::json!(["z"]));
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u64_range("42", 0, 100), Some(42));
        assert_eq!(parse_u64_range("101", 0, 100), None);
        assert_eq!(parse_u64_range("-1", 0, 100), None);
        assert_eq!(parse_usize_range(" 7 ", 1, 10), Some(7));
        assert_eq!(parse_usize_range("0", 1, 10), None);
    }

    // ── loading ─────────────────────────────────────────────────────

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.server.heartbeat_interval_ms, 30_000);
        assert_eq!(settings.client.max_reconnects, 5);
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"executor": {{"retryBound": 3}}, "session": {{"eventLogLimit": 200}}}}"#
        )
        .unwrap();
        let settings = load_settings_from_path(file.path()).unwrap();
        assert_eq!(settings.executor.retry_bound, 3);
        assert_eq!(settings.executor.retry_delay_ms, 1_000);
        assert_eq!(settings.session.event_log_limit, Some(200));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let err = load_settings_from_path(file.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"compiler": {{"connectives": []}}}}"#).unwrap();
        let err = load_settings_from_path(file.path()).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)));
    }

    #[test]
    fn validate_rejects_bad_url() {
        let mut settings = GodHandSettings::default();
        settings.client.server_url = "ws://localhost".into();
        assert!(validate(&settings).is_err());
    }

    #[test]
    fn resolve_path_keeps_absolute() {
        assert_eq!(resolve_path("/var/lib/h.db"), PathBuf::from("/var/lib/h.db"));
        assert!(resolve_path("history.db").ends_with(".godhand/history.db"));
    }
}
