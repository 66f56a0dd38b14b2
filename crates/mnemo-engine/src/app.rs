use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use mnemo_core::errors::Result;
use mnemo_core::StorageBackend;
use mnemo_integrity::{CleanupReport, IntegrityAwareStorage, IntegrityOptions};
use mnemo_resilience::{BreakerRegistry, RetryPolicy};
use mnemo_settings::MnemoSettings;
use mnemo_store::SqliteBackend;

use crate::fallback::{FallbackConfig, FallbackContext};
use crate::orchestrator::ResilientOrchestrator;
use crate::primary::StoragePrimaryService;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub integrity: CleanupReport,
    pub fallback_users_pruned: usize,
}

/// Every long-lived component, built once at startup and passed by
/// reference to whoever needs it.
pub struct AppContext {
    settings: MnemoSettings,
    storage: Arc<IntegrityAwareStorage>,
    breakers: Arc<BreakerRegistry>,
    orchestrator: ResilientOrchestrator,
}

impl AppContext {
    /// Compose the stack over an arbitrary backend.
    pub fn build(settings: MnemoSettings, backend: Arc<dyn StorageBackend>) -> Result<Self> {
        let policy = RetryPolicy::from_settings(&settings.retry)?;
        let storage = Arc::new(IntegrityAwareStorage::new(
            backend,
            IntegrityOptions::from_settings(&settings.integrity),
        ));
        let primary = Arc::new(
            StoragePrimaryService::new(storage.clone()).with_context_messages(settings.fallback.context_messages),
        );
        let breakers = Arc::new(BreakerRegistry::from_settings(&settings.breakers));
        let fallback = Arc::new(FallbackContext::new(FallbackConfig::from_settings(&settings.fallback)));
        let orchestrator = ResilientOrchestrator::new(primary, fallback, breakers.clone(), policy);

        Ok(Self {
            settings,
            storage,
            breakers,
            orchestrator,
        })
    }

    /// SQLite at the configured path.
    pub fn from_settings(settings: MnemoSettings) -> Result<Self> {
        let path = settings.storage.resolved_db_path();
        let backend = SqliteBackend::open(&path)?;
        info!(path = %path.display(), "database opened");
        Self::build(settings, Arc::new(backend))
    }

    /// SQLite held in memory; nothing survives the process.
    pub fn in_memory(settings: MnemoSettings) -> Result<Self> {
        Self::build(settings, Arc::new(SqliteBackend::in_memory()?))
    }

    /// Initializes the primary path. Returns false when starting degraded.
    pub async fn start(&self) -> bool {
        self.orchestrator.initialize().await
    }

    pub fn settings(&self) -> &MnemoSettings {
        &self.settings
    }

    pub fn storage(&self) -> &Arc<IntegrityAwareStorage> {
        &self.storage
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn orchestrator(&self) -> &ResilientOrchestrator {
        &self.orchestrator
    }

    /// Age out backups, quarantine entries and idle fallback users.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        MaintenanceReport {
            integrity: self.storage.cleanup_expired(),
            fallback_users_pruned: self.orchestrator.cleanup_fallback_cache(false),
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.orchestrator.shutdown().await
    }
}
