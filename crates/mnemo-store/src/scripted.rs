//! Fault-injecting backend for exercising retry, breaker and fallback paths.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use mnemo_core::errors::{MemoryError, Result};
use mnemo_core::models::{Entity, ListFilter};
use mnemo_core::StorageBackend;

use crate::in_memory::InMemoryBackend;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendOp {
    Initialize,
    Store,
    Get,
    List,
    Delete,
    DeleteAll,
}

#[derive(Default)]
struct Script {
    fail_next: usize,
    fail_always: bool,
    error: Option<MemoryError>,
    latency: Option<Duration>,
    calls: HashMap<BackendOp, usize>,
    /// Per-operation faults: successes still allowed, then the error.
    op_faults: HashMap<BackendOp, (usize, MemoryError)>,
}

/// Wraps an [`InMemoryBackend`] and fails calls on demand.
///
/// Every call is counted, including the ones that fail.
pub struct ScriptedBackend {
    inner: Arc<InMemoryBackend>,
    script: Mutex<Script>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::wrapping(Arc::new(InMemoryBackend::new()))
    }

    pub fn wrapping(inner: Arc<InMemoryBackend>) -> Self {
        Self {
            inner,
            script: Mutex::new(Script::default()),
        }
    }

    pub fn inner(&self) -> &Arc<InMemoryBackend> {
        &self.inner
    }

    /// The next `n` calls fail with `error`, then calls succeed again.
    pub fn fail_next(&self, n: usize, error: MemoryError) {
        let mut script = self.script.lock();
        script.fail_next = n;
        script.error = Some(error);
    }

    /// Every call fails with `error` until [`heal`](Self::heal).
    pub fn fail_always(&self, error: MemoryError) {
        let mut script = self.script.lock();
        script.fail_always = true;
        script.error = Some(error);
    }

    /// Calls of `op` succeed `successes` more times, then fail with `error`
    /// until [`heal`](Self::heal). Other operations are unaffected.
    pub fn fail_op_after(&self, op: BackendOp, successes: usize, error: MemoryError) {
        let _ = self.script.lock().op_faults.insert(op, (successes, error));
    }

    pub fn heal(&self) {
        let mut script = self.script.lock();
        script.fail_next = 0;
        script.fail_always = false;
        script.error = None;
        script.op_faults.clear();
    }

    /// Delay applied to every call before it runs.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.script.lock().latency = latency;
    }

    pub fn calls(&self) -> usize {
        self.script.lock().calls.values().sum()
    }

    pub fn calls_of(&self, op: BackendOp) -> usize {
        self.script.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn reset_calls(&self) {
        self.script.lock().calls.clear();
    }

    async fn enter(&self, op: BackendOp) -> Result<()> {
        let (latency, failure) = {
            let mut script = self.script.lock();
            *script.calls.entry(op).or_default() += 1;
            let failure = if script.fail_always {
                script.error.clone()
            } else if script.fail_next > 0 {
                script.fail_next -= 1;
                script.error.clone()
            } else {
                match script.op_faults.get_mut(&op) {
                    Some((0, error)) => Some(error.clone()),
                    Some((left, _)) => {
                        *left -= 1;
                        None
                    }
                    None => None,
                }
            };
            (script.latency, failure)
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StorageBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn initialize(&self) -> Result<()> {
        self.enter(BackendOp::Initialize).await
    }

    async fn store(&self, entity: Entity) -> Result<()> {
        self.enter(BackendOp::Store).await?;
        self.inner.store(entity).await
    }

    async fn get(&self, id: &str) -> Result<Option<Entity>> {
        self.enter(BackendOp::Get).await?;
        self.inner.get(id).await
    }

    async fn list_by_owner(&self, owner_id: &str, filter: &ListFilter) -> Result<Vec<Entity>> {
        self.enter(BackendOp::List).await?;
        self.inner.list_by_owner(owner_id, filter).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.enter(BackendOp::Delete).await?;
        self.inner.delete(id).await
    }

    async fn delete_all_for_owner(&self, owner_id: &str) -> Result<usize> {
        self.enter(BackendOp::DeleteAll).await?;
        self.inner.delete_all_for_owner(owner_id).await
    }

    /// Unhealthy while scripted to fail every call.
    async fn health_check(&self) -> bool {
        !self.script.lock().fail_always && self.inner.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::models::Conversation;

    #[tokio::test]
    async fn fails_exactly_n_times() {
        let backend = ScriptedBackend::new();
        backend.fail_next(2, MemoryError::TransientIo("connection reset".into()));

        assert!(backend.store(Conversation::new("u1").into()).await.is_err());
        assert!(backend.store(Conversation::new("u1").into()).await.is_err());
        assert!(backend.store(Conversation::new("u1").into()).await.is_ok());
        assert_eq!(backend.calls_of(BackendOp::Store), 3);
        assert_eq!(backend.inner().len(), 1);
    }

    #[tokio::test]
    async fn fail_always_until_healed() {
        let backend = ScriptedBackend::new();
        backend.fail_always(MemoryError::TransientIo("down".into()));
        assert!(!backend.health_check().await);
        assert!(backend.get("x").await.is_err());
        assert!(backend.initialize().await.is_err());

        backend.heal();
        assert!(backend.health_check().await);
        assert!(backend.get("x").await.unwrap().is_none());
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn op_fault_targets_one_operation() {
        let backend = ScriptedBackend::new();
        for _ in 0..3 {
            backend.store(Conversation::new("u1").into()).await.unwrap();
        }
        let ids: Vec<String> = backend
            .list_by_owner("u1", &ListFilter::default())
            .await
            .unwrap()
            .iter()
            .map(|e| e.id().to_owned())
            .collect();
        backend.fail_op_after(BackendOp::Delete, 1, MemoryError::TransientIo("connection reset".into()));

        assert!(backend.delete(&ids[0]).await.unwrap());
        assert!(backend.delete(&ids[1]).await.is_err());
        assert!(backend.get(&ids[1]).await.unwrap().is_some());
        assert!(backend.store(Conversation::new("u1").into()).await.is_ok());

        backend.heal();
        assert!(backend.delete(&ids[1]).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn latency_is_applied() {
        let backend = ScriptedBackend::new();
        backend.set_latency(Some(Duration::from_secs(5)));
        let start = tokio::time::Instant::now();
        let _ = backend.get("x").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
