use async_trait::async_trait;

use crate::errors::Result;
use crate::models::{Entity, ListFilter};

/// Persistence seam. Implementations are assumed reliable only on the
/// happy path; everything above this trait treats their errors as data.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Optional setup hook. Backends with nothing to prepare keep the default.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    /// Insert or replace by id.
    async fn store(&self, entity: Entity) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Entity>>;

    async fn list_by_owner(&self, owner_id: &str, filter: &ListFilter) -> Result<Vec<Entity>>;

    /// Returns whether anything was removed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Returns the number of removed entities.
    async fn delete_all_for_owner(&self, owner_id: &str) -> Result<usize>;

    async fn health_check(&self) -> bool;
}
