use async_trait::async_trait;

use crate::errors::Result;
use crate::models::{
    Conversation, ConversationContext, DeleteOptions, PrivacySettings, SearchQuery, SearchResult,
    UserDataExport,
};

/// The full-feature memory path the orchestrator prefers while healthy.
#[async_trait]
pub trait PrimaryMemoryService: Send + Sync {
    /// Optional setup hook; services with nothing to prepare keep the default.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn store_conversation(&self, user_id: &str, conversation: Conversation) -> Result<()>;

    async fn retrieve_context(&self, user_id: &str, limit: Option<usize>) -> Result<ConversationContext>;

    async fn search_history(&self, user_id: &str, query: &SearchQuery) -> Result<Vec<SearchResult>>;

    /// Returns the number of removed entities.
    async fn delete_user_data(&self, user_id: &str, options: &DeleteOptions) -> Result<usize>;

    async fn export_user_data(&self, user_id: &str) -> Result<UserDataExport>;

    async fn update_privacy_settings(&self, user_id: &str, settings: PrivacySettings) -> Result<()>;

    async fn get_privacy_settings(&self, user_id: &str) -> Result<PrivacySettings>;

    async fn health_check(&self) -> bool;
}
