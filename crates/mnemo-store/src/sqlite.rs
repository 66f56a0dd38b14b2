use std::path::Path;

use async_trait::async_trait;
use tracing::warn;

use mnemo_core::errors::{MemoryError, Result};
use mnemo_core::models::{Entity, ListFilter};
use mnemo_core::StorageBackend;

use crate::database::Database;
use crate::entities::EntityRepo;
use crate::error::StoreError;

/// `StorageBackend` over SQLite. Each call runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteBackend {
    repo: EntityRepo,
}

impl SqliteBackend {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Database::in_memory()?))
    }

    pub fn new(db: Database) -> Self {
        Self {
            repo: EntityRepo::new(db),
        }
    }

    pub fn repo(&self) -> &EntityRepo {
        &self.repo
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&EntityRepo) -> std::result::Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let repo = self.repo.clone();
        match tokio::task::spawn_blocking(move || f(&repo)).await {
            Ok(result) => result.map_err(MemoryError::from),
            Err(e) => {
                warn!(error = %e, "sqlite task failed");
                Err(MemoryError::TransientIo(format!("storage task failed: {e}")))
            }
        }
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn store(&self, entity: Entity) -> Result<()> {
        self.blocking(move |repo| repo.upsert(&entity)).await
    }

    async fn get(&self, id: &str) -> Result<Option<Entity>> {
        let id = id.to_owned();
        self.blocking(move |repo| repo.get(&id)).await
    }

    async fn list_by_owner(&self, owner_id: &str, filter: &ListFilter) -> Result<Vec<Entity>> {
        let owner_id = owner_id.to_owned();
        let filter = filter.clone();
        self.blocking(move |repo| repo.list_by_owner(&owner_id, &filter)).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let id = id.to_owned();
        self.blocking(move |repo| repo.delete(&id)).await
    }

    async fn delete_all_for_owner(&self, owner_id: &str) -> Result<usize> {
        let owner_id = owner_id.to_owned();
        self.blocking(move |repo| repo.delete_all_for_owner(&owner_id)).await
    }

    async fn health_check(&self) -> bool {
        self.blocking(|repo| Ok(repo.database().ping())).await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::models::{Conversation, EntityKind, Message, PrivacySettings};
    use mnemo_core::ErrorKind;

    #[tokio::test]
    async fn round_trip_through_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteBackend::open(&dir.path().join("memory.db")).unwrap();
        assert!(backend.health_check().await);

        let conv = Conversation::new("u1").with_messages(vec![Message::user("hi"), Message::assistant("hello")]);
        let id = conv.id.to_string();
        backend.store(conv.clone().into()).await.unwrap();
        backend.store(PrivacySettings::defaults_for("u1").into()).await.unwrap();

        let got = backend.get(&id).await.unwrap().unwrap();
        assert_eq!(got.as_conversation().unwrap().messages, conv.messages);

        let convs = backend
            .list_by_owner("u1", &ListFilter::of_kind(EntityKind::Conversation))
            .await
            .unwrap();
        assert_eq!(convs.len(), 1);

        assert!(backend.delete(&id).await.unwrap());
        assert_eq!(backend.delete_all_for_owner("u1").await.unwrap(), 1);
        assert!(backend.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn damaged_row_surfaces_as_corruption() {
        let backend = SqliteBackend::in_memory().unwrap();
        let conv = Conversation::new("u1");
        let id = conv.id.to_string();
        backend.store(conv.into()).await.unwrap();
        assert!(backend.repo().write_raw_body(&id, "not json").unwrap());

        let err = backend.get(&id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corruption);
    }
}
