//! `StorageBackend` decorator that validates, repairs, snapshots and
//! checksums entities around the wrapped backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use mnemo_core::errors::{ErrorKind, MemoryError, Result};
use mnemo_core::models::{Entity, ListFilter};
use mnemo_core::StorageBackend;
use mnemo_settings::IntegritySettings;

use crate::backup::{BackupKind, BackupStore};
use crate::checksum::IntegrityChecker;
use crate::corruption::CorruptionDetector;
use crate::quarantine::{CorruptionReport, QuarantineStats, QuarantineStore};
use crate::recovery::RecoveryEngine;
use crate::validation::{DefaultValidator, EntityValidator};

const DAY: Duration = Duration::from_secs(86_400);

#[derive(Clone, Debug)]
pub struct IntegrityOptions {
    /// Repair or pass through corrupt data instead of failing the call.
    pub tolerant: bool,
    pub auto_recovery: bool,
    pub schema_version: String,
    pub backup_retention: Duration,
    pub quarantine_retention: Duration,
}

impl Default for IntegrityOptions {
    fn default() -> Self {
        Self::from_settings(&IntegritySettings::default())
    }
}

impl IntegrityOptions {
    pub fn from_settings(settings: &IntegritySettings) -> Self {
        Self {
            tolerant: settings.tolerant,
            auto_recovery: settings.auto_recovery,
            schema_version: settings.schema_version.clone(),
            backup_retention: DAY * settings.backup_retention_days,
            quarantine_retention: DAY * settings.quarantine_retention_days,
        }
    }

    pub fn tolerant() -> Self {
        Self {
            tolerant: true,
            ..Self::default()
        }
    }

    pub fn strict() -> Self {
        Self {
            tolerant: false,
            ..Self::default()
        }
    }
}

/// How a read was satisfied.
#[derive(Debug)]
enum ReadOutcome {
    Verified(Entity),
    Recovered(Entity),
    Restored(Entity),
    Corrupt { entity: Entity, reason: String },
}

#[derive(Clone, Debug, Serialize)]
pub struct IntegrityHealth {
    pub backend: String,
    pub backend_healthy: bool,
    pub tolerant: bool,
    pub auto_recovery: bool,
    pub schema_version: String,
    pub backup_count: usize,
    pub critical_backup_count: usize,
    pub quarantine: QuarantineStats,
    pub corruption: CorruptionReport,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub backups_removed: usize,
    pub quarantine_removed: usize,
}

pub struct IntegrityAwareStorage {
    backend: Arc<dyn StorageBackend>,
    options: IntegrityOptions,
    checker: IntegrityChecker,
    detector: CorruptionDetector,
    recovery: RecoveryEngine,
    validator: Box<dyn EntityValidator>,
    quarantine: QuarantineStore,
    backups: BackupStore,
}

impl IntegrityAwareStorage {
    pub fn new(backend: Arc<dyn StorageBackend>, options: IntegrityOptions) -> Self {
        Self {
            backend,
            checker: IntegrityChecker::new(options.schema_version.clone()),
            options,
            detector: CorruptionDetector::new(),
            recovery: RecoveryEngine::new(),
            validator: Box::new(DefaultValidator::new()),
            quarantine: QuarantineStore::new(),
            backups: BackupStore::new(),
        }
    }

    pub fn with_validator(mut self, validator: impl EntityValidator + 'static) -> Self {
        self.validator = Box::new(validator);
        self
    }

    pub fn options(&self) -> &IntegrityOptions {
        &self.options
    }

    pub fn checker(&self) -> &IntegrityChecker {
        &self.checker
    }

    pub fn quarantine(&self) -> &QuarantineStore {
        &self.quarantine
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Keyed by entity id and payload checksum, so rereading the same bad row adds nothing.
    fn quarantine_entity(&self, entity: &Entity, reason: &str) {
        let payload = entity.to_value().unwrap_or(Value::Null);
        let patterns = self.detector.detect_patterns(&payload);
        let fingerprint = format!("{}:{}", entity.id(), self.checker.checksum_value(&payload));
        let _ = self
            .quarantine
            .add_once(fingerprint, payload, reason, patterns, entity.kind().as_str());
    }

    /// Typed recovery followed by re-validation.
    fn try_recover(&self, entity: &Entity) -> Option<Entity> {
        if !self.options.auto_recovery {
            return None;
        }
        let value = entity.to_value().ok()?;
        let recovered = self.recovery.attempt_typed_recovery(&value, entity.kind())?;
        self.validator.validate(&recovered).is_valid().then_some(recovered)
    }

    /// Backups are restored in tolerant mode whether or not `auto_recovery` is on.
    fn restore_from_backup(&self, id: &str) -> Option<Entity> {
        let payload = self.backups.restore_latest_for(id)?;
        let mut entity = Entity::from_value(payload).ok()?;
        if !self.validator.validate(&entity).is_valid() {
            return None;
        }
        let _ = entity.take_integrity();
        Some(entity)
    }

    fn check_read(&self, entity: Entity) -> ReadOutcome {
        let recorded = entity.integrity().map(|r| r.checksum.clone());
        let checksum_ok = recorded
            .as_deref()
            .map_or(true, |expected| self.checker.validate_or_throw(&entity, expected).is_ok());
        let report = self.validator.validate(&entity);
        if checksum_ok && report.is_valid() {
            return ReadOutcome::Verified(entity);
        }

        let reason = if checksum_ok {
            report.reason()
        } else if report.is_valid() {
            "checksum mismatch".to_owned()
        } else {
            format!("checksum mismatch; {}", report.reason())
        };
        let id = entity.id().to_owned();
        warn!(entity_id = %id, kind = %entity.kind(), reason = %reason, "integrity check failed on read");

        if !self.options.tolerant {
            self.quarantine_entity(&entity, &reason);
            return ReadOutcome::Corrupt { entity, reason };
        }

        // A repair that reproduces the recorded checksum is a full recovery.
        let candidate = self.try_recover(&entity);
        if let Some(recovered) = &candidate {
            let matches_record = recorded
                .as_deref()
                .map_or(true, |expected| self.checker.verify(recovered, expected));
            if matches_record {
                info!(entity_id = %id, "entity recovered on read");
                return ReadOutcome::Recovered(recovered.clone());
            }
        }

        self.quarantine_entity(&entity, &reason);

        if let Some(restored) = self.restore_from_backup(&id) {
            info!(entity_id = %id, "entity restored from backup");
            return ReadOutcome::Restored(restored);
        }
        if let Some(recovered) = candidate {
            info!(entity_id = %id, "entity partially recovered on read");
            return ReadOutcome::Recovered(recovered);
        }
        ReadOutcome::Corrupt { entity, reason }
    }

    fn prepare_write(&self, entity: Entity) -> Result<Entity> {
        let report = self.validator.validate(&entity);
        if report.is_valid() {
            return Ok(entity);
        }
        let reason = report.reason();
        warn!(entity_id = %entity.id(), kind = %entity.kind(), reason = %reason, "entity failed validation on write");

        if !self.options.tolerant {
            self.quarantine_entity(&entity, &reason);
            return Err(MemoryError::Corruption(reason));
        }
        if let Some(recovered) = self.try_recover(&entity) {
            info!(entity_id = %recovered.id(), "entity repaired before write");
            return Ok(recovered);
        }
        self.quarantine_entity(&entity, &reason);
        warn!(entity_id = %entity.id(), "writing unrepaired entity in tolerant mode");
        Ok(entity)
    }

    pub async fn detailed_health(&self) -> IntegrityHealth {
        IntegrityHealth {
            backend: self.backend.name().to_owned(),
            backend_healthy: self.backend.health_check().await,
            tolerant: self.options.tolerant,
            auto_recovery: self.options.auto_recovery,
            schema_version: self.options.schema_version.clone(),
            backup_count: self.backups.len(),
            critical_backup_count: self.backups.list_by_owner(None, Some(BackupKind::Critical)).len(),
            quarantine: self.quarantine.stats(),
            corruption: self.quarantine.report(),
        }
    }

    pub fn cleanup_integrity_data(&self, backup_age: Duration, quarantine_age: Duration) -> CleanupReport {
        let report = CleanupReport {
            backups_removed: self.backups.purge_older_than(backup_age),
            quarantine_removed: self.quarantine.purge_older_than(quarantine_age),
        };
        info!(
            backups_removed = report.backups_removed,
            quarantine_removed = report.quarantine_removed,
            "integrity data cleaned up"
        );
        report
    }

    /// Cleanup using the configured retention windows.
    pub fn cleanup_expired(&self) -> CleanupReport {
        self.cleanup_integrity_data(self.options.backup_retention, self.options.quarantine_retention)
    }

    /// Deletes `ids` as one unit. The readable entities go into a critical
    /// backup first; if a delete fails midway, the ones already removed are
    /// written back and the original error is returned. Anything that cannot
    /// be written back is reported through [`MemoryError::PartialDelete`].
    pub async fn delete_batch(&self, owner_id: &str, ids: &[String]) -> Result<usize> {
        let mut present: Vec<(String, Option<Entity>)> = Vec::with_capacity(ids.len());
        for id in ids {
            match self.backend.get(id).await {
                Ok(Some(entity)) => present.push((id.clone(), Some(entity))),
                Ok(None) => {}
                Err(e) if matches!(e.kind(), ErrorKind::Corruption | ErrorKind::Serialization) => {
                    warn!(entity_id = %id, error = %e, "batch delete includes an unreadable entity");
                    present.push((id.clone(), None));
                }
                Err(e) => return Err(e),
            }
        }
        if present.is_empty() {
            return Ok(0);
        }
        // Unreadable entities cannot be written back, so they are deleted last.
        present.sort_by_key(|(_, entity)| entity.is_none());

        let payload = Value::Array(
            present
                .iter()
                .filter_map(|(_, entity)| entity.as_ref()?.to_value().ok())
                .collect(),
        );
        let backup_id = self.backups.create_critical(owner_id, payload).to_string();
        debug!(owner_id, backup_id = %backup_id, entities = present.len(), "critical backup taken before batch delete");

        let mut removed = Vec::with_capacity(present.len());
        let mut pending = present.into_iter();
        while let Some((id, entity)) = pending.next() {
            match self.backend.delete(&id).await {
                Ok(true) => removed.push((id, entity)),
                Ok(false) => {}
                Err(cause) => {
                    let remaining = std::iter::once(id).chain(pending.by_ref().map(|(id, _)| id)).collect();
                    return Err(self.roll_back(backup_id, removed, remaining, cause).await);
                }
            }
        }
        Ok(removed.len())
    }

    async fn roll_back(
        &self,
        backup_id: String,
        removed: Vec<(String, Option<Entity>)>,
        remaining: Vec<String>,
        cause: MemoryError,
    ) -> MemoryError {
        let mut lost = Vec::new();
        for (id, entity) in removed.into_iter().rev() {
            let restored = match entity {
                Some(entity) => match self.backend.store(entity).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(entity_id = %id, error = %e, "rollback write failed");
                        false
                    }
                },
                None => false,
            };
            if !restored {
                lost.push(id);
            }
        }

        if lost.is_empty() {
            warn!(backup_id = %backup_id, error = %cause, "batch delete failed, removed entities written back");
            return cause;
        }
        lost.reverse();
        error!(
            backup_id = %backup_id,
            removed = lost.len(),
            remaining = remaining.len(),
            error = %cause,
            "batch delete left partially applied"
        );
        MemoryError::PartialDelete {
            backup_id,
            removed: lost,
            remaining,
        }
    }
}

#[async_trait]
impl StorageBackend for IntegrityAwareStorage {
    fn name(&self) -> &str {
        "integrity_aware"
    }

    async fn initialize(&self) -> Result<()> {
        self.backend.initialize().await
    }

    async fn shutdown(&self) -> Result<()> {
        self.backend.shutdown().await
    }

    async fn store(&self, entity: Entity) -> Result<()> {
        let mut entity = self.prepare_write(entity)?;
        let _ = entity.take_integrity();

        let snapshot = entity.to_value()?;
        let backup_id = self.backups.snapshot(entity.id(), snapshot);
        debug!(entity_id = %entity.id(), backup_id = ?backup_id, "pre-write snapshot taken");

        let record = self.checker.record_for(&entity)?;
        entity.set_integrity(Some(record));
        self.backend.store(entity).await
    }

    async fn get(&self, id: &str) -> Result<Option<Entity>> {
        let entity = match self.backend.get(id).await {
            Ok(Some(entity)) => entity,
            Ok(None) => return Ok(None),
            Err(e) if matches!(e.kind(), ErrorKind::Corruption | ErrorKind::Serialization) => {
                warn!(entity_id = %id, error = %e, "backend returned unreadable entity");
                if self.options.tolerant {
                    if let Some(restored) = self.restore_from_backup(id) {
                        info!(entity_id = %id, "unreadable entity restored from backup");
                        return Ok(Some(restored));
                    }
                }
                return Err(MemoryError::Corruption(format!("entity {id} unreadable: {e}")));
            }
            Err(e) => return Err(e),
        };

        match self.check_read(entity) {
            ReadOutcome::Verified(e) | ReadOutcome::Recovered(e) | ReadOutcome::Restored(e) => Ok(Some(e)),
            ReadOutcome::Corrupt { entity, reason } => {
                if self.options.tolerant {
                    warn!(entity_id = %id, "returning unverified entity in tolerant mode");
                    Ok(Some(entity))
                } else {
                    Err(MemoryError::Corruption(format!("entity {id}: {reason}")))
                }
            }
        }
    }

    /// Strict mode drops corrupt entities from the listing instead of failing it.
    async fn list_by_owner(&self, owner_id: &str, filter: &ListFilter) -> Result<Vec<Entity>> {
        let raw = self.backend.list_by_owner(owner_id, filter).await?;
        let mut out = Vec::with_capacity(raw.len());
        for entity in raw {
            match self.check_read(entity) {
                ReadOutcome::Verified(e) | ReadOutcome::Recovered(e) | ReadOutcome::Restored(e) => out.push(e),
                ReadOutcome::Corrupt { entity, .. } if self.options.tolerant => out.push(entity),
                ReadOutcome::Corrupt { entity, .. } => {
                    debug!(entity_id = %entity.id(), "corrupt entity omitted from listing");
                }
            }
        }
        Ok(out)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        match self.backend.get(id).await {
            Ok(Some(entity)) => {
                let value = entity.to_value()?;
                let _ = self.backups.snapshot(id, value);
            }
            Ok(None) => return Ok(false),
            // Unreadable entities can still be deleted.
            Err(e) if matches!(e.kind(), ErrorKind::Corruption | ErrorKind::Serialization) => {
                warn!(entity_id = %id, error = %e, "deleting unreadable entity without snapshot");
            }
            Err(e) => return Err(e),
        }
        self.backend.delete(id).await
    }

    async fn delete_all_for_owner(&self, owner_id: &str) -> Result<usize> {
        let everything = self.backend.list_by_owner(owner_id, &ListFilter::default()).await?;
        let payload = Value::Array(everything.iter().filter_map(|e| e.to_value().ok()).collect());
        let backup_id = self.backups.create_critical(owner_id, payload);
        info!(owner_id, backup_id = %backup_id, entities = everything.len(), "critical backup taken before owner delete");
        self.backend.delete_all_for_owner(owner_id).await
    }

    async fn health_check(&self) -> bool {
        self.backend.health_check().await
    }
}
