//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`MnemoSettings::default()`]
//! 2. If `~/.mnemo/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `MNEMO_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{home_dir, MnemoSettings};

/// Resolve the path to the settings file (`~/.mnemo/settings.json`).
pub fn settings_path() -> PathBuf {
    home_dir().join(".mnemo").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<MnemoSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON, or values that would make
/// the retry policy unusable, are errors.
pub fn load_settings_from_path(path: &Path) -> Result<MnemoSettings> {
    let defaults = serde_json::to_value(MnemoSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: MnemoSettings = serde_json::from_value(merged)?;
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

/// Cross-field checks that serde defaults cannot express.
pub fn validate(settings: &MnemoSettings) -> Result<()> {
    let r = &settings.retry;
    if r.max_attempts == 0 {
        return Err(SettingsError::InvalidValue("retry.maxAttempts must be > 0".into()));
    }
    if r.backoff_factor <= 1.0 {
        return Err(SettingsError::InvalidValue("retry.backoffFactor must be > 1".into()));
    }
    if !(0.0..=1.0).contains(&r.jitter_fraction) {
        return Err(SettingsError::InvalidValue("retry.jitterFraction must be within [0, 1]".into()));
    }
    if r.base_delay_ms > r.max_delay_ms {
        return Err(SettingsError::InvalidValue("retry.baseDelayMs exceeds retry.maxDelayMs".into()));
    }
    for (key, threshold) in settings.breakers.entries() {
        if threshold.failure_threshold == 0 {
            return Err(SettingsError::InvalidValue(format!(
                "breakers.{key}.failureThreshold must be > 0"
            )));
        }
    }
    let f = settings.fallback.eviction_fraction;
    if !(f > 0.0 && f <= 1.0) {
        return Err(SettingsError::InvalidValue("fallback.evictionFraction must be within (0, 1]".into()));
    }
    Ok(())
}

/// Apply environment variable overrides to loaded settings.
///
/// - Integers must be valid and within the specified range
/// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Invalid values are ignored (fall back to file/default)
pub fn apply_env_overrides(settings: &mut MnemoSettings) {
    // ── Retry ───────────────────────────────────────────────────────
    if let Some(v) = read_env_u64("MNEMO_RETRY_MAX_ATTEMPTS", 1, 20) {
        settings.retry.max_attempts = v as u32;
    }
    if let Some(v) = read_env_u64("MNEMO_RETRY_BASE_DELAY_MS", 0, 600_000) {
        settings.retry.base_delay_ms = v;
    }
    if let Some(v) = read_env_u64("MNEMO_RETRY_MAX_DELAY_MS", 0, 3_600_000) {
        settings.retry.max_delay_ms = v;
    }

    // ── Integrity ───────────────────────────────────────────────────
    if let Some(v) = read_env_bool("MNEMO_INTEGRITY_TOLERANT") {
        settings.integrity.tolerant = v;
    }
    if let Some(v) = read_env_bool("MNEMO_INTEGRITY_AUTO_RECOVERY") {
        settings.integrity.auto_recovery = v;
    }

    // ── Fallback cache ──────────────────────────────────────────────
    if let Some(v) = read_env_usize("MNEMO_FALLBACK_MAX_USERS", 1, 1_000_000) {
        settings.fallback.max_users = v;
    }
    if let Some(v) = read_env_usize("MNEMO_FALLBACK_MAX_MESSAGES", 1, 10_000) {
        settings.fallback.max_messages_per_user = v;
    }

    // ── Storage / logging ───────────────────────────────────────────
    if let Some(v) = read_env_string("MNEMO_DB_PATH") {
        settings.storage.db_path = v;
    }
    if let Some(v) = read_env_string("MNEMO_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("MNEMO_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

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
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"retry": {"maxAttempts": 3, "baseDelayMs": 1000}});
        let source = serde_json::json!({"retry": {"maxAttempts": 5}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["retry"]["maxAttempts"], 5);
        assert_eq!(merged["retry"]["baseDelayMs"], 1000);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4, 5]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4, 5]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.breakers.primary.failure_threshold, 2);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"breakers": {"storage": {"failureThreshold": 7}}, "fallback": {"maxUsers": 5}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.breakers.storage.failure_threshold, 7);
        assert_eq!(settings.breakers.storage.recovery_timeout_ms, 60_000);
        assert_eq!(settings.fallback.max_users, 5);
        assert_eq!(settings.fallback.max_messages_per_user, 20);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_unusable_retry_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"retry": {"backoffFactor": 1.0}}"#).unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::InvalidValue(_)));
    }

    #[test]
    fn validate_rejects_zero_threshold() {
        let mut settings = MnemoSettings::default();
        settings.breakers.search.failure_threshold = 0;
        let err = validate(&settings).unwrap_err();
        assert!(err.to_string().contains("breakers.search"));
    }

    #[test]
    fn validate_rejects_base_above_max() {
        let mut settings = MnemoSettings::default();
        settings.retry.base_delay_ms = 60_000;
        assert!(validate(&settings).is_err());
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in &["true", "1", "yes", "on", "TRUE", "On"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in &["false", "0", "no", "off", "No"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u64_range("5", 1, 20), Some(5));
        assert_eq!(parse_u64_range("0", 1, 20), None);
        assert_eq!(parse_u64_range("abc", 1, 20), None);
        assert_eq!(parse_usize_range("100", 1, 1000), Some(100));
        assert_eq!(parse_usize_range("2000", 1, 1000), None);
    }

    #[test]
    fn settings_path_under_dot_mnemo() {
        assert!(settings_path().ends_with(".mnemo/settings.json"));
    }
}
