use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IntegritySettings {
    /// `false` means strict: corrupted data is rejected instead of repaired.
    pub tolerant: bool,
    pub auto_recovery: bool,
    pub schema_version: String,
    pub backup_retention_days: u32,
    pub quarantine_retention_days: u32,
}

impl Default for IntegritySettings {
    fn default() -> Self {
        Self {
            tolerant: false,
            auto_recovery: true,
            schema_version: "1.0".to_string(),
            backup_retention_days: 7,
            quarantine_retention_days: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FallbackSettings {
    pub max_users: usize,
    pub max_messages_per_user: usize,
    /// Messages handed back by the degraded context path.
    pub context_messages: usize,
    pub idle_ttl_secs: u64,
    pub eviction_fraction: f64,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            max_users: 100,
            max_messages_per_user: 20,
            context_messages: 10,
            idle_ttl_secs: 2 * 60 * 60,
            eviction_fraction: 0.2,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// SQLite file; a leading `~` expands to `$HOME`.
    pub db_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: "~/.mnemo/database/memory.db".to_string(),
        }
    }
}

impl StorageSettings {
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_home(&self.db_path)
    }
}

/// `$HOME`, or `/tmp` when unset.
pub fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None if path == "~" => home_dir(),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_defaults_are_strict() {
        let i = IntegritySettings::default();
        assert!(!i.tolerant);
        assert!(i.auto_recovery);
        assert_eq!(i.backup_retention_days, 7);
        assert_eq!(i.quarantine_retention_days, 30);
    }

    #[test]
    fn fallback_defaults() {
        let f = FallbackSettings::default();
        assert_eq!(f.max_users, 100);
        assert_eq!(f.idle_ttl_secs, 7200);
        assert!((f.eviction_fraction - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn absolute_db_path_is_untouched() {
        let s = StorageSettings {
            db_path: "/var/lib/mnemo.db".into(),
        };
        assert_eq!(s.resolved_db_path(), PathBuf::from("/var/lib/mnemo.db"));
    }

    #[test]
    fn tilde_expands_under_home() {
        let resolved = StorageSettings::default().resolved_db_path();
        assert!(resolved.ends_with(".mnemo/database/memory.db"));
        assert!(!resolved.to_string_lossy().starts_with('~'));
    }
}
