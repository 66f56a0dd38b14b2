use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use mnemo_core::errors::{MemoryError, Result};
use mnemo_core::models::{Entity, ListFilter};
use mnemo_core::StorageBackend;

/// Document store kept in process memory. Entities are held as JSON so
/// tests can damage them the way a real store could.
pub struct InMemoryBackend {
    docs: DashMap<String, Value>,
    healthy: AtomicBool,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            docs: DashMap::new(),
            healthy: AtomicBool::new(true),
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn raw(&self, id: &str) -> Option<Value> {
        self.docs.get(id).map(|v| v.value().clone())
    }

    /// Mutate the stored document in place. Returns false if `id` is absent.
    pub fn corrupt(&self, id: &str, f: impl FnOnce(&mut Value)) -> bool {
        match self.docs.get_mut(id) {
            Some(mut doc) => {
                f(doc.value_mut());
                true
            }
            None => false,
        }
    }

    fn decode(id: &str, value: &Value) -> Result<Entity> {
        Entity::from_value(value.clone())
            .map_err(|e| MemoryError::Corruption(format!("stored entity {id} unreadable: {e}")))
    }
}

fn owner_of(doc: &Value) -> Option<&str> {
    doc.get("user_id").and_then(Value::as_str)
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn store(&self, entity: Entity) -> Result<()> {
        let value = entity.to_value()?;
        let _ = self.docs.insert(entity.id().to_owned(), value);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Entity>> {
        match self.docs.get(id) {
            Some(doc) => Self::decode(id, doc.value()).map(Some),
            None => Ok(None),
        }
    }

    async fn list_by_owner(&self, owner_id: &str, filter: &ListFilter) -> Result<Vec<Entity>> {
        let docs: Vec<(String, Value)> = self
            .docs
            .iter()
            .filter(|doc| owner_of(doc.value()) == Some(owner_id))
            .map(|doc| (doc.key().clone(), doc.value().clone()))
            .collect();

        let mut out = Vec::with_capacity(docs.len());
        for (id, doc) in docs {
            let entity = Self::decode(&id, &doc)?;
            if filter.matches(&entity) {
                out.push(entity);
            }
        }
        out.sort_by(|a, b| (a.timestamp(), a.id()).cmp(&(b.timestamp(), b.id())));
        if let Some(limit) = filter.limit {
            let skip = out.len().saturating_sub(limit);
            let _ = out.drain(..skip);
        }
        Ok(out)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.docs.remove(id).is_some())
    }

    async fn delete_all_for_owner(&self, owner_id: &str) -> Result<usize> {
        let before = self.docs.len();
        self.docs.retain(|_, doc| owner_of(doc) != Some(owner_id));
        Ok(before - self.docs.len())
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::models::{Conversation, EntityKind, UserPreferences};
    use mnemo_core::ErrorKind;
    use serde_json::json;

    #[tokio::test]
    async fn store_get_list_delete() {
        let backend = InMemoryBackend::new();
        let conv = Conversation::new("u1");
        let id = conv.id.to_string();
        backend.store(conv.into()).await.unwrap();
        backend.store(UserPreferences::new("u1").into()).await.unwrap();
        backend.store(Conversation::new("u2").into()).await.unwrap();

        assert_eq!(backend.get(&id).await.unwrap().unwrap().owner_id(), "u1");
        assert_eq!(backend.list_by_owner("u1", &ListFilter::default()).await.unwrap().len(), 2);
        let only_prefs = backend
            .list_by_owner("u1", &ListFilter::of_kind(EntityKind::Preferences))
            .await
            .unwrap();
        assert_eq!(only_prefs.len(), 1);

        assert!(backend.delete(&id).await.unwrap());
        assert_eq!(backend.delete_all_for_owner("u1").await.unwrap(), 1);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_document_reads_as_corruption() {
        let backend = InMemoryBackend::new();
        let conv = Conversation::new("u1");
        let id = conv.id.to_string();
        backend.store(conv.into()).await.unwrap();

        assert!(backend.corrupt(&id, |v| v["timestamp"] = json!("yesterday")));
        let err = backend.get(&id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corruption);
        assert!(!backend.corrupt("missing", |_| {}));
    }

    #[tokio::test]
    async fn health_can_be_toggled() {
        let backend = InMemoryBackend::new();
        assert!(backend.health_check().await);
        backend.set_healthy(false);
        assert!(!backend.health_check().await);
    }
}
