use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use mnemo_core::ids::QuarantineId;

use crate::corruption::CorruptionPattern;

/// How many recent corruption events the report keeps.
const RECENT_EVENTS: usize = 10;

/// Data that failed validation and could not be repaired. Never mutated.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QuarantineEntry {
    pub id: QuarantineId,
    pub payload: Value,
    pub reason: String,
    pub detected_patterns: BTreeSet<CorruptionPattern>,
    pub quarantined_at: DateTime<Utc>,
    pub data_type: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct QuarantineStats {
    pub total_count: usize,
    pub counts_by_reason: BTreeMap<String, usize>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// One line of the corruption log.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CorruptionEvent {
    pub quarantine_id: QuarantineId,
    pub data_type: String,
    pub reason: String,
    pub patterns: BTreeSet<CorruptionPattern>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CorruptionReport {
    pub total_corruption_events: u64,
    pub quarantined_items: usize,
    pub recent_events: Vec<CorruptionEvent>,
    pub counts_by_data_type: BTreeMap<String, u64>,
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<QuarantineId, QuarantineEntry>,
    recent: VecDeque<CorruptionEvent>,
    counts_by_data_type: BTreeMap<String, u64>,
    total_events: u64,
    fingerprints: HashMap<String, QuarantineId>,
}

/// Append-mostly side store for unrecoverable payloads.
#[derive(Default)]
pub struct QuarantineStore {
    inner: RwLock<Inner>,
    seq: AtomicU64,
}

impl QuarantineStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self, now: DateTime<Utc>) -> QuarantineId {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        QuarantineId::from_raw(format!("q_{}_{seq:06}", now.timestamp_millis()))
    }

    pub fn add(
        &self,
        payload: Value,
        reason: impl Into<String>,
        patterns: BTreeSet<CorruptionPattern>,
        data_type: impl Into<String>,
    ) -> QuarantineId {
        self.insert(None, payload, reason.into(), patterns, data_type.into())
    }

    /// Like [`add`](Self::add), but a payload already held under `fingerprint`
    /// is not quarantined again; the existing id is returned instead.
    pub fn add_once(
        &self,
        fingerprint: impl Into<String>,
        payload: Value,
        reason: impl Into<String>,
        patterns: BTreeSet<CorruptionPattern>,
        data_type: impl Into<String>,
    ) -> QuarantineId {
        self.insert(Some(fingerprint.into()), payload, reason.into(), patterns, data_type.into())
    }

    fn insert(
        &self,
        fingerprint: Option<String>,
        payload: Value,
        reason: String,
        patterns: BTreeSet<CorruptionPattern>,
        data_type: String,
    ) -> QuarantineId {
        let mut inner = self.inner.write();
        if let Some(id) = fingerprint.as_ref().and_then(|f| inner.fingerprints.get(f)) {
            if inner.entries.contains_key(id) {
                debug!(quarantine_id = %id, "payload already quarantined");
                return id.clone();
            }
        }

        let now = Utc::now();
        let id = self.next_id(now);
        let entry = QuarantineEntry {
            id: id.clone(),
            payload,
            reason,
            detected_patterns: patterns,
            quarantined_at: now,
            data_type,
        };
        warn!(
            quarantine_id = %id,
            data_type = %entry.data_type,
            reason = %entry.reason,
            patterns = ?entry.detected_patterns,
            "entity quarantined"
        );

        let event = CorruptionEvent {
            quarantine_id: id.clone(),
            data_type: entry.data_type.clone(),
            reason: entry.reason.clone(),
            patterns: entry.detected_patterns.clone(),
            timestamp: now,
        };

        *inner.counts_by_data_type.entry(entry.data_type.clone()).or_default() += 1;
        inner.total_events += 1;
        inner.recent.push_back(event);
        while inner.recent.len() > RECENT_EVENTS {
            let _ = inner.recent.pop_front();
        }
        let _ = inner.entries.insert(id.clone(), entry);
        if let Some(fingerprint) = fingerprint {
            let _ = inner.fingerprints.insert(fingerprint, id.clone());
        }
        id
    }

    pub fn get(&self, id: &QuarantineId) -> Option<QuarantineEntry> {
        self.inner.read().entries.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Vec<QuarantineEntry> {
        self.inner.read().entries.values().cloned().collect()
    }

    pub fn stats(&self) -> QuarantineStats {
        let inner = self.inner.read();
        let mut stats = QuarantineStats {
            total_count: inner.entries.len(),
            ..QuarantineStats::default()
        };
        for entry in inner.entries.values() {
            *stats.counts_by_reason.entry(entry.reason.clone()).or_default() += 1;
            let ts = entry.quarantined_at;
            stats.oldest = Some(stats.oldest.map_or(ts, |o| o.min(ts)));
            stats.newest = Some(stats.newest.map_or(ts, |n| n.max(ts)));
        }
        stats
    }

    /// Corruption log totals survive purges; only entries are removed.
    pub fn report(&self) -> CorruptionReport {
        let inner = self.inner.read();
        CorruptionReport {
            total_corruption_events: inner.total_events,
            quarantined_items: inner.entries.len(),
            recent_events: inner.recent.iter().cloned().collect(),
            counts_by_data_type: inner.counts_by_data_type.clone(),
        }
    }

    pub fn purge_older_than(&self, age: Duration) -> usize {
        let Ok(age) = chrono::Duration::from_std(age) else {
            return 0;
        };
        let cutoff = Utc::now() - age;
        let mut inner = self.inner.write();
        let before = inner.entries.len();
        inner.entries.retain(|_, e| e.quarantined_at >= cutoff);
        let Inner { entries, fingerprints, .. } = &mut *inner;
        fingerprints.retain(|_, id| entries.contains_key(id));
        before - entries.len()
    }
}
