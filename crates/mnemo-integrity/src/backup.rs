use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use mnemo_core::errors::{MemoryError, Result};
use mnemo_core::ids::BackupId;

use crate::checksum::{canonical_bytes, hex_sha256};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupKind {
    Normal,
    Critical,
}

/// Immutable snapshot. Restoring never mutates it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BackupEntry {
    pub id: BackupId,
    pub payload: Value,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    pub kind: BackupKind,
    pub owner_id: Option<String>,
    /// Id of the entity the payload snapshots, when it is a single entity.
    pub subject_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BackupValidation {
    pub backup_id: String,
    pub valid: bool,
    pub issues: Vec<String>,
}

struct Stored {
    seq: u64,
    entry: BackupEntry,
}

#[derive(Default)]
pub struct BackupStore {
    entries: RwLock<BTreeMap<String, Stored>>,
    seq: AtomicU64,
}

fn payload_checksum(payload: &Value) -> String {
    hex_sha256(&canonical_bytes(payload))
}

fn str_field(payload: &Value, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

impl BackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot `payload` under `id`. Owner and subject are read from the
    /// payload's `user_id` and `id`. Returns false if `id` is taken.
    pub fn create(&self, id: impl Into<String>, payload: Value, kind: BackupKind) -> bool {
        let owner_id = str_field(&payload, "user_id");
        let subject_id = str_field(&payload, "id");
        self.insert(id.into(), payload, kind, owner_id, subject_id)
    }

    /// Normal snapshot of a single entity, keyed `{subject}@{micros}.{n}`.
    pub fn snapshot(&self, subject_id: &str, payload: Value) -> Option<BackupId> {
        let nonce = self.seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("{subject_id}@{}.{nonce}", Utc::now().timestamp_micros());
        let owner_id = str_field(&payload, "user_id");
        self.insert(id.clone(), payload, BackupKind::Normal, owner_id, Some(subject_id.to_owned()))
            .then(|| BackupId::from_raw(id))
    }

    /// Snapshot everything an owner has before a destructive operation.
    pub fn create_critical(&self, owner_id: &str, payload: Value) -> BackupId {
        let now = Utc::now();
        let nonce = self.seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("critical_{owner_id}_{}_{nonce}", now.timestamp_millis());
        let _ = self.insert(id.clone(), payload, BackupKind::Critical, Some(owner_id.to_owned()), None);
        BackupId::from_raw(id)
    }

    fn insert(
        &self,
        id: String,
        payload: Value,
        kind: BackupKind,
        owner_id: Option<String>,
        subject_id: Option<String>,
    ) -> bool {
        let mut entries = self.entries.write();
        if entries.contains_key(&id) {
            debug!(backup_id = %id, "backup id already exists");
            return false;
        }
        let entry = BackupEntry {
            id: BackupId::from_raw(id.clone()),
            checksum: payload_checksum(&payload),
            payload,
            created_at: Utc::now(),
            kind,
            owner_id,
            subject_id,
        };
        debug!(backup_id = %id, kind = ?kind, "backup created");
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let _ = entries.insert(id, Stored { seq, entry });
        true
    }

    /// The stored payload, or `None` if missing or its checksum no longer matches.
    pub fn restore(&self, id: &str) -> Option<Value> {
        match self.restore_checked(id) {
            Ok(payload) => Some(payload),
            Err(MemoryError::BackupIntegrity { backup_id }) => {
                warn!(backup_id = %backup_id, "backup failed verification, not restoring");
                None
            }
            Err(_) => None,
        }
    }

    pub fn restore_checked(&self, id: &str) -> Result<Value> {
        let entries = self.entries.read();
        let stored = entries
            .get(id)
            .ok_or_else(|| MemoryError::NotFound(format!("backup {id}")))?;
        if payload_checksum(&stored.entry.payload) != stored.entry.checksum {
            return Err(MemoryError::BackupIntegrity { backup_id: id.to_owned() });
        }
        Ok(stored.entry.payload.clone())
    }

    /// Newest verifiable snapshot of the entity with id `subject_id`.
    pub fn restore_latest_for(&self, subject_id: &str) -> Option<Value> {
        let entries = self.entries.read();
        let mut candidates: Vec<&Stored> = entries
            .values()
            .filter(|s| s.entry.subject_id.as_deref() == Some(subject_id))
            .collect();
        candidates.sort_by(|a, b| (b.entry.created_at, b.seq).cmp(&(a.entry.created_at, a.seq)));
        candidates
            .into_iter()
            .find(|s| payload_checksum(&s.entry.payload) == s.entry.checksum)
            .map(|s| s.entry.payload.clone())
    }

    pub fn get(&self, id: &str) -> Option<BackupEntry> {
        self.entries.read().get(id).map(|s| s.entry.clone())
    }

    /// Newest first.
    pub fn list_by_owner(&self, owner_id: Option<&str>, kind: Option<BackupKind>) -> Vec<BackupEntry> {
        let entries = self.entries.read();
        let mut matched: Vec<&Stored> = entries
            .values()
            .filter(|s| owner_id.map_or(true, |o| s.entry.owner_id.as_deref() == Some(o)))
            .filter(|s| kind.map_or(true, |k| s.entry.kind == k))
            .collect();
        matched.sort_by(|a, b| (b.entry.created_at, b.seq).cmp(&(a.entry.created_at, a.seq)));
        matched.into_iter().map(|s| s.entry.clone()).collect()
    }

    pub fn validate(&self, id: &str) -> BackupValidation {
        let mut issues = Vec::new();
        match self.entries.read().get(id) {
            None => issues.push("backup not found".to_owned()),
            Some(stored) => {
                if payload_checksum(&stored.entry.payload) != stored.entry.checksum {
                    issues.push("checksum verification failed".to_owned());
                }
                if stored.entry.created_at > Utc::now() {
                    issues.push("backup timestamp is in the future".to_owned());
                }
            }
        }
        BackupValidation {
            backup_id: id.to_owned(),
            valid: issues.is_empty(),
            issues,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn purge_older_than(&self, age: Duration) -> usize {
        let Ok(age) = chrono::Duration::from_std(age) else {
            return 0;
        };
        let cutoff = Utc::now() - age;
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, s| s.entry.created_at >= cutoff);
        before - entries.len()
    }

    #[cfg(test)]
    pub(crate) fn tamper(&self, id: &str, f: impl FnOnce(&mut BackupEntry)) {
        if let Some(stored) = self.entries.write().get_mut(id) {
            f(&mut stored.entry);
        }
    }
}
