//! Routes every memory operation between the primary path and the
//! always-available fallback.
//!
//! Convenience reads (context, search) fall back silently. Compliance
//! operations (delete, export, privacy settings) go to the primary path
//! only and propagate its errors. Stores fall back to the cache and report
//! that the conversation was not durably persisted.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mnemo_core::errors::{ErrorKind, MemoryError, Result};
use mnemo_core::models::{
    Conversation, ConversationContext, DeleteOptions, PrivacySettings, SearchQuery, SearchResult, UserDataExport,
};
use mnemo_core::PrimaryMemoryService;
use mnemo_resilience::{BreakerRegistry, BreakerStatus, RetryExecutor, RetryPolicy};

use crate::fallback::{FallbackCacheStats, FallbackContext};
use crate::health::{Capability, HealthStatus};

/// Where a stored conversation ended up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreOutcome {
    Persisted,
    /// Only the fallback cache holds it; not durably persisted.
    CachedOnly,
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub per_capability: BTreeMap<String, bool>,
    pub degraded: bool,
    pub primary_reachable: bool,
    pub breakers: Vec<BreakerStatus>,
    pub fallback: FallbackCacheStats,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct OperationCounts {
    pub primary_successes: u64,
    pub primary_failures: u64,
    pub fallback_uses: u64,
    pub rejected_compliance_calls: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ServiceMetrics {
    pub service_health: BTreeMap<String, bool>,
    pub degraded: bool,
    pub total_retries: u64,
    pub breakers: Vec<BreakerStatus>,
    pub fallback_cache: FallbackCacheStats,
    pub operations: OperationCounts,
}

#[derive(Default)]
struct Counters {
    primary_successes: AtomicU64,
    primary_failures: AtomicU64,
    fallback_uses: AtomicU64,
    rejected: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> OperationCounts {
        OperationCounts {
            primary_successes: self.primary_successes.load(Ordering::Relaxed),
            primary_failures: self.primary_failures.load(Ordering::Relaxed),
            fallback_uses: self.fallback_uses.load(Ordering::Relaxed),
            rejected_compliance_calls: self.rejected.load(Ordering::Relaxed),
        }
    }
}

pub struct ResilientOrchestrator {
    primary: Arc<dyn PrimaryMemoryService>,
    fallback: Arc<FallbackContext>,
    executor: RetryExecutor,
    policy: RetryPolicy,
    health: HealthStatus,
    shutdown: CancellationToken,
    counters: Counters,
}

impl ResilientOrchestrator {
    pub fn new(
        primary: Arc<dyn PrimaryMemoryService>,
        fallback: Arc<FallbackContext>,
        breakers: Arc<BreakerRegistry>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            primary,
            fallback,
            executor: RetryExecutor::new(breakers),
            policy,
            health: HealthStatus::new(),
            shutdown: CancellationToken::new(),
            counters: Counters::default(),
        }
    }

    pub fn health(&self) -> &HealthStatus {
        &self.health
    }

    pub fn fallback(&self) -> &Arc<FallbackContext> {
        &self.fallback
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        self.executor.breakers()
    }

    pub fn is_degraded(&self) -> bool {
        self.health.is_degraded()
    }

    /// Bring up the primary path. A failure switches to degraded mode but
    /// never fails initialization: the fallback is always ready.
    ///
    /// Returns whether the primary path is available.
    pub async fn initialize(&self) -> bool {
        let primary = &self.primary;
        let result = self
            .executor
            .execute_cancellable(
                &self.policy,
                Some(Capability::Primary.as_str()),
                &self.shutdown,
                || async move { primary.initialize().await },
            )
            .await;
        match result {
            Ok(()) => {
                self.health.mark(Capability::Primary, true);
                self.health.set_degraded(false);
                info!("primary memory service initialized");
                true
            }
            Err(e) => {
                self.health.mark(Capability::Primary, false);
                self.health.set_degraded(true);
                warn!(error = %e, "primary initialization failed, operating in degraded mode");
                false
            }
        }
    }

    pub async fn store_conversation(&self, user_id: &str, conversation: Conversation) -> Result<StoreOutcome> {
        if conversation.user_id != user_id {
            return Err(MemoryError::Validation(format!(
                "conversation {} belongs to {}, not {user_id}",
                conversation.id, conversation.user_id
            )));
        }

        if self.health.primary_available() {
            let primary = &self.primary;
            let conv = &conversation;
            let stored = self
                .guarded(Capability::Storage, || {
                    let conversation = conv.clone();
                    async move { primary.store_conversation(user_id, conversation).await }
                })
                .await;
            match stored {
                Ok(()) => return Ok(StoreOutcome::Persisted),
                Err(e) => warn!(
                    user_id,
                    conversation_id = %conversation.id,
                    error = %e,
                    "primary store failed, caching only"
                ),
            }
        }

        self.fallback.cache_conversation(user_id, &conversation);
        Counters::bump(&self.counters.fallback_uses);
        warn!(user_id, conversation_id = %conversation.id, "conversation held in fallback cache only");
        Ok(StoreOutcome::CachedOnly)
    }

    /// Never fails: falls back to the cached context.
    pub async fn retrieve_context(&self, user_id: &str, limit: Option<usize>) -> ConversationContext {
        if self.health.primary_available() {
            let primary = &self.primary;
            match self
                .guarded(Capability::Context, || async move { primary.retrieve_context(user_id, limit).await })
                .await
            {
                Ok(context) => return context,
                Err(e) => warn!(user_id, error = %e, "context retrieval failed, using fallback"),
            }
        } else {
            debug!(user_id, "primary unavailable, using fallback context");
        }
        Counters::bump(&self.counters.fallback_uses);
        self.fallback.build_context(user_id, limit)
    }

    /// Never fails: an unavailable search yields no results.
    pub async fn search_history(&self, user_id: &str, query: &SearchQuery) -> Vec<SearchResult> {
        if self.health.primary_available() {
            let primary = &self.primary;
            match self
                .guarded(Capability::Search, || async move { primary.search_history(user_id, query).await })
                .await
            {
                Ok(results) => return results,
                Err(e) => warn!(user_id, error = %e, "search failed, returning no results"),
            }
        } else {
            debug!(user_id, "search unavailable in fallback mode");
        }
        Counters::bump(&self.counters.fallback_uses);
        Vec::new()
    }

    pub async fn delete_user_data(&self, user_id: &str, options: &DeleteOptions) -> Result<usize> {
        self.require_primary("delete_user_data")?;
        let primary = &self.primary;
        let removed = self
            .guarded(Capability::Storage, || async move { primary.delete_user_data(user_id, options).await })
            .await
            .inspect_err(|e| error!(user_id, error = %e, "user data deletion failed"))?;
        let _ = self.fallback.forget_user(user_id);
        Ok(removed)
    }

    pub async fn export_user_data(&self, user_id: &str) -> Result<UserDataExport> {
        self.require_primary("export_user_data")?;
        let primary = &self.primary;
        self.guarded(Capability::Storage, || async move { primary.export_user_data(user_id).await })
            .await
            .inspect_err(|e| error!(user_id, error = %e, "user data export failed"))
    }

    pub async fn update_privacy_settings(&self, user_id: &str, settings: PrivacySettings) -> Result<()> {
        self.require_primary("update_privacy_settings")?;
        let primary = &self.primary;
        let settings = &settings;
        self.guarded(Capability::Preferences, || {
            let settings = settings.clone();
            async move { primary.update_privacy_settings(user_id, settings).await }
        })
        .await
        .inspect_err(|e| error!(user_id, error = %e, "privacy settings update failed"))
    }

    /// Propagates errors; never substitutes default settings.
    pub async fn get_privacy_settings(&self, user_id: &str) -> Result<PrivacySettings> {
        self.require_primary("get_privacy_settings")?;
        let primary = &self.primary;
        self.guarded(Capability::Preferences, || async move { primary.get_privacy_settings(user_id).await })
            .await
            .inspect_err(|e| error!(user_id, error = %e, "privacy settings read failed"))
    }

    pub async fn health_check(&self) -> HealthReport {
        let primary_reachable = self.primary.health_check().await;
        if !self.health.is_degraded() {
            let was = self.health.mark(Capability::Primary, primary_reachable);
            if was && !primary_reachable {
                warn!("primary health check failed");
            }
        }

        let degraded = self.health.is_degraded();
        let status = if degraded {
            "degraded"
        } else if self.health.all_healthy() {
            "healthy"
        } else {
            "partial"
        };
        HealthReport {
            status,
            per_capability: self.health_map(),
            degraded,
            primary_reachable,
            breakers: self.breakers().statuses(),
            fallback: self.fallback.cache_stats(),
        }
    }

    /// Operator hook: `"primary"` re-initializes the primary path and leaves
    /// degraded mode; a capability name resets that capability's breaker.
    pub async fn recover_service(&self, name: &str) -> Result<()> {
        let capability: Capability = name.parse().map_err(MemoryError::Validation)?;
        self.breakers().get(capability.as_str()).reset();

        if capability == Capability::Primary {
            let primary = &self.primary;
            self.executor
                .execute_cancellable(&self.policy, Some(capability.as_str()), &self.shutdown, || async move {
                    primary.initialize().await
                })
                .await
                .inspect_err(|e| error!(error = %e, "primary recovery failed"))?;
            self.health.set_degraded(false);
        }
        self.health.mark(capability, true);
        info!(capability = %capability, "service recovered");
        Ok(())
    }

    pub fn force_degraded_mode(&self, enable: bool) {
        self.health.set_degraded(enable);
        if enable {
            warn!("forced into degraded mode");
        } else {
            info!("forced out of degraded mode");
        }
    }

    pub fn service_metrics(&self) -> ServiceMetrics {
        ServiceMetrics {
            service_health: self.health_map(),
            degraded: self.health.is_degraded(),
            total_retries: self.executor.total_retries(),
            breakers: self.breakers().statuses(),
            fallback_cache: self.fallback.cache_stats(),
            operations: self.counters.snapshot(),
        }
    }

    /// Drops idle users, then everything if `clear_all`. Returns the number
    /// of users removed.
    pub fn cleanup_fallback_cache(&self, clear_all: bool) -> usize {
        let idle = self.fallback.prune_idle();
        if clear_all {
            idle + self.fallback.clear()
        } else {
            idle
        }
    }

    /// Cancels in-flight retries, then shuts the primary path down.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        self.primary.shutdown().await
    }

    fn health_map(&self) -> BTreeMap<String, bool> {
        self.health
            .snapshot()
            .into_iter()
            .map(|(c, ok)| (c.as_str().to_owned(), ok))
            .collect()
    }

    fn require_primary(&self, operation: &str) -> Result<()> {
        if self.health.primary_available() {
            return Ok(());
        }
        Counters::bump(&self.counters.rejected);
        error!(operation, "primary path unavailable, refusing compliance operation");
        Err(MemoryError::unavailable(operation, "primary memory path is unavailable (degraded mode)"))
    }

    /// Runs `op` through the retry executor under `capability`'s breaker and
    /// records the outcome in the health map.
    async fn guarded<T, F, Fut>(&self, capability: Capability, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let result = self
            .executor
            .execute_cancellable(&self.policy, Some(capability.as_str()), &self.shutdown, op)
            .await;
        match &result {
            Ok(_) => {
                Counters::bump(&self.counters.primary_successes);
                if !self.health.mark(capability, true) {
                    info!(capability = %capability, "capability healthy again");
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::Cancelled) => {}
            Err(e) => {
                Counters::bump(&self.counters.primary_failures);
                if self.health.mark(capability, false) {
                    warn!(capability = %capability, kind = %e.kind(), "capability marked unhealthy");
                }
            }
        }
        result
    }
}
