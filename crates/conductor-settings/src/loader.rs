//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ConductorSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `CONDUCTOR_*` environment overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{ConductorSettings, TransportKind};

/// Resolve the path to the settings file (`~/.conductor/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".conductor").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ConductorSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ConductorSettings> {
    let mut settings = load_file_layers(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides.
///
/// Out-of-range file values fail with `SettingsError::InvalidValue`.
pub fn load_file_layers(path: &Path) -> Result<ConductorSettings> {
    let defaults = serde_json::to_value(ConductorSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let settings: ConductorSettings = serde_json::from_value(merged)?;
    settings.validate()?;
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

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut ConductorSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are ignored with a warning and the file/default value kept.
pub fn apply_overrides_from<F>(settings: &mut ConductorSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("CONDUCTOR_SETUP_CFG") {
        settings.setup_cfg_path = v;
    }

    // ── Dispatch ────────────────────────────────────────────────────
    if let Some(v) = env.parsed("CONDUCTOR_TRANSPORT", parse_transport) {
        settings.dispatch.transport = v;
    }
    if let Some(v) = env.u64("CONDUCTOR_DISPATCH_TIMEOUT_MS", 1, 600_000) {
        settings.dispatch.timeout_ms = v;
    }
    if let Some(v) = env.u64("CONDUCTOR_DEFAULT_DELAY_MS", 0, 60_000) {
        settings.dispatch.default_delay_ms = v;
    }
    if let Some(v) = env.parsed("CONDUCTOR_SERIALIZE_PER_MODULE", parse_bool) {
        settings.dispatch.serialize_per_module = v;
    }

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("CONDUCTOR_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("CONDUCTOR_PORT", 1, 65535) {
        settings.server.port = v;
    }

    // ── Runs / logging ──────────────────────────────────────────────
    if let Some(v) = env.usize("CONDUCTOR_RUN_HISTORY", 1, 100_000) {
        settings.runs.history_limit = v;
    }
    if let Some(v) = env.string("CONDUCTOR_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("CONDUCTOR_LOG_JSON", parse_bool) {
        settings.logging.json = v;
    }
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

pub fn parse_transport(val: &str) -> Option<TransportKind> {
    match val.to_lowercase().as_str() {
        "tcp" => Some(TransportKind::Tcp),
        "http" => Some(TransportKind::Http),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

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

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, |s| parse_u16_range(s, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, |s| parse_u64_range(s, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, |s| parse_usize_range(s, min, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"dispatch": {"timeoutMs": 5000, "transport": "tcp"}});
        let source = serde_json::json!({"dispatch": {"timeoutMs": 100}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["dispatch"]["timeoutMs"], 100);
        assert_eq!(merged["dispatch"]["transport"], "tcp");
    }

    #[test]
    fn merge_skips_null() {
        let target = serde_json::json!({"a": 1});
        let source = serde_json::json!({"a": null, "b": 2});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_replaces_arrays() {
        let target = serde_json::json!({"a": [1, 2, 3]});
        let source = serde_json::json!({"a": [9]});
        assert_eq!(deep_merge(target, source)["a"], serde_json::json!([9]));
    }

    // ── file layers ─────────────────────────────────────────────────

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_file_layers(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.dispatch.timeout_ms, 5_000);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"setupCfgPath": "/cfg/aa.toml", "dispatch": {"transport": "http"}}"#,
        )
        .unwrap();

        let settings = load_file_layers(&path).unwrap();
        assert_eq!(settings.setup_cfg_path, "/cfg/aa.toml");
        assert_eq!(settings.dispatch.transport, TransportKind::Http);
        assert_eq!(settings.dispatch.timeout_ms, 5_000);
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_file_layers(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn out_of_range_file_value_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"dispatch": {"timeoutMs": 0}}"#).unwrap();
        assert!(matches!(load_file_layers(&path), Err(SettingsError::InvalidValue(_))));
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let mut settings = ConductorSettings::default();
        apply_overrides_from(
            &mut settings,
            lookup(&[
                ("CONDUCTOR_TRANSPORT", "HTTP"),
                ("CONDUCTOR_DISPATCH_TIMEOUT_MS", "750"),
                ("CONDUCTOR_SERIALIZE_PER_MODULE", "yes"),
                ("CONDUCTOR_PORT", "9100"),
                ("CONDUCTOR_SETUP_CFG", "/tmp/cr.toml"),
            ]),
        );
        assert_eq!(settings.dispatch.transport, TransportKind::Http);
        assert_eq!(settings.dispatch.timeout_ms, 750);
        assert!(settings.dispatch.serialize_per_module);
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.setup_cfg_path, "/tmp/cr.toml");
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = ConductorSettings::default();
        apply_overrides_from(
            &mut settings,
            lookup(&[
                ("CONDUCTOR_TRANSPORT", "carrier-pigeon"),
                ("CONDUCTOR_DISPATCH_TIMEOUT_MS", "0"),
                ("CONDUCTOR_PORT", "99999"),
                ("CONDUCTOR_LOG_JSON", "maybe"),
            ]),
        );
        assert_eq!(settings.dispatch.transport, TransportKind::Tcp);
        assert_eq!(settings.dispatch.timeout_ms, 5_000);
        assert_eq!(settings.server.port, 8090);
        assert!(!settings.logging.json);
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut settings = ConductorSettings::default();
        apply_overrides_from(&mut settings, lookup(&[("CONDUCTOR_HOST", "")]));
        assert_eq!(settings.server.host, "127.0.0.1");
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("nah"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8080", 1, 65535), Some(8080));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u64_range("60001", 0, 60_000), None);
        assert_eq!(parse_usize_range("12", 1, 100), Some(12));
        assert_eq!(parse_usize_range("abc", 1, 100), None);
    }
}
