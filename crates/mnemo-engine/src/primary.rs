//! Storage-backed implementation of the full-feature memory path.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use mnemo_core::errors::{MemoryError, Result};
use mnemo_core::models::{
    Conversation, ConversationContext, ConversationSummary, DeleteOptions, DeleteScope, Entity, EntityKind,
    ListFilter, PrivacySettings, SearchQuery, SearchResult, UserDataExport, UserPreferences,
};
use mnemo_core::{PrimaryMemoryService, StorageBackend};
use mnemo_integrity::IntegrityAwareStorage;

const SNIPPET_CHARS: usize = 200;
const DEFAULT_CONTEXT_MESSAGES: usize = 10;
const HISTORY_SUMMARIES: usize = 5;
const SUMMARY_BOOST: f64 = 1.2;
const FILTER_ONLY_SCORE: f64 = 0.5;

/// Recency context, keyword search, scoped deletion and export over an
/// [`IntegrityAwareStorage`].
pub struct StoragePrimaryService {
    storage: Arc<IntegrityAwareStorage>,
    context_messages: usize,
}

impl StoragePrimaryService {
    pub fn new(storage: Arc<IntegrityAwareStorage>) -> Self {
        Self {
            storage,
            context_messages: DEFAULT_CONTEXT_MESSAGES,
        }
    }

    pub fn with_context_messages(mut self, count: usize) -> Self {
        self.context_messages = count;
        self
    }

    pub fn storage(&self) -> &Arc<IntegrityAwareStorage> {
        &self.storage
    }

    async fn privacy_for(&self, user_id: &str) -> Result<PrivacySettings> {
        match self.storage.get(&PrivacySettings::id_for(user_id)).await? {
            Some(Entity::Privacy(settings)) => Ok(settings),
            Some(other) => Err(MemoryError::Corruption(format!(
                "entity {} is a {}, expected privacy settings",
                other.id(),
                other.kind()
            ))),
            None => Ok(PrivacySettings::defaults_for(user_id)),
        }
    }

    async fn conversations(&self, user_id: &str, filter: ListFilter) -> Result<Vec<Conversation>> {
        let entities = self.storage.list_by_owner(user_id, &filter).await?;
        Ok(entities
            .into_iter()
            .filter_map(|e| match e {
                Entity::Conversation(c) => Some(c),
                _ => None,
            })
            .collect())
    }

    /// All or nothing: a failed batch is written back or reported as partial.
    async fn delete_ids(&self, user_id: &str, ids: impl IntoIterator<Item = String>) -> Result<usize> {
        let ids: Vec<String> = ids.into_iter().collect();
        self.storage.delete_batch(user_id, &ids).await
    }
}

#[async_trait]
impl PrimaryMemoryService for StoragePrimaryService {
    async fn initialize(&self) -> Result<()> {
        self.storage.initialize().await
    }

    async fn shutdown(&self) -> Result<()> {
        self.storage.shutdown().await
    }

    async fn store_conversation(&self, user_id: &str, mut conversation: Conversation) -> Result<()> {
        if conversation.user_id != user_id {
            return Err(MemoryError::Validation(format!(
                "conversation {} belongs to {}, not {user_id}",
                conversation.id, conversation.user_id
            )));
        }
        let privacy = self.privacy_for(user_id).await?;
        if !privacy.is_memory_enabled() {
            debug!(user_id, conversation_id = %conversation.id, "memory disabled, not storing");
            return Ok(());
        }
        conversation.refresh_metadata();
        self.storage.store(conversation.into()).await
    }

    async fn retrieve_context(&self, user_id: &str, limit: Option<usize>) -> Result<ConversationContext> {
        let privacy = self.privacy_for(user_id).await?;
        let mut context = ConversationContext::empty(user_id);
        if !privacy.is_memory_enabled() {
            context.context_summary = "Memory disabled for this user".to_owned();
            return Ok(context);
        }

        let take = limit.unwrap_or(self.context_messages);
        let conversations = self.conversations(user_id, ListFilter::of_kind(EntityKind::Conversation)).await?;
        let mut recent: Vec<_> = conversations.iter().flat_map(|c| c.messages.iter().cloned()).collect();
        recent.sort_by_key(|m| m.timestamp);
        let skip = recent.len().saturating_sub(take);
        context.recent_messages = recent.split_off(skip);

        let mut summary_filter = ListFilter::of_kind(EntityKind::Summary);
        summary_filter.limit = Some(HISTORY_SUMMARIES);
        context.relevant_history = self
            .storage
            .list_by_owner(user_id, &summary_filter)
            .await?
            .into_iter()
            .filter_map(|e| match e {
                Entity::Summary(s) => Some(s),
                _ => None,
            })
            .rev()
            .collect::<Vec<ConversationSummary>>();

        context.user_preferences = match self.storage.get(&UserPreferences::id_for(user_id)).await? {
            Some(Entity::Preferences(p)) => Some(p),
            _ => Some(UserPreferences::new(user_id)),
        };
        context.context_summary = format!(
            "{} recent messages from {} conversations",
            context.recent_messages.len(),
            conversations.len()
        );
        Ok(context)
    }

    async fn search_history(&self, user_id: &str, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        let privacy = self.privacy_for(user_id).await?;
        if !privacy.allow_search_indexing || !privacy.is_memory_enabled() {
            debug!(user_id, "search indexing disabled");
            return Ok(Vec::new());
        }

        let mut filter = ListFilter::of_kind(EntityKind::Conversation);
        if let Some(range) = &query.date_range {
            filter.since = range.start;
            filter.until = range.end;
        }
        let conversations = self.conversations(user_id, filter).await?;
        let keywords: Vec<String> = query
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        let mut results = Vec::new();
        for conv in conversations.iter().filter(|c| matches_topics(c, &query.topics)) {
            if keywords.is_empty() {
                if let Some(first) = conv.messages.first() {
                    results.push(SearchResult {
                        conversation_id: conv.id.to_string(),
                        message_id: Some(first.id.to_string()),
                        relevance_score: FILTER_ONLY_SCORE,
                        timestamp: conv.timestamp,
                        content_snippet: snippet(&first.content),
                        topics: conv.metadata.topics.clone(),
                    });
                }
                continue;
            }

            if let Some(summary) = &conv.summary {
                let score = keyword_score(summary, &keywords);
                if score > 0.0 {
                    results.push(SearchResult {
                        conversation_id: conv.id.to_string(),
                        message_id: None,
                        relevance_score: (score * SUMMARY_BOOST).min(1.0),
                        timestamp: conv.timestamp,
                        content_snippet: snippet(summary),
                        topics: conv.metadata.topics.clone(),
                    });
                }
            }
            for message in &conv.messages {
                let score = keyword_score(&message.content, &keywords);
                if score > 0.0 {
                    results.push(SearchResult {
                        conversation_id: conv.id.to_string(),
                        message_id: Some(message.id.to_string()),
                        relevance_score: score,
                        timestamp: message.timestamp,
                        content_snippet: snippet(&message.content),
                        topics: conv.metadata.topics.clone(),
                    });
                }
            }
        }

        results.sort_by(|a, b| {
            b.relevance_score
                .total_cmp(&a.relevance_score)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        });
        Ok(results.into_iter().skip(query.offset).take(query.limit).collect())
    }

    async fn delete_user_data(&self, user_id: &str, options: &DeleteOptions) -> Result<usize> {
        let removed = match options.scope {
            DeleteScope::AllData => self.storage.delete_all_for_owner(user_id).await?,
            DeleteScope::Conversations => {
                let convs = self.conversations(user_id, ListFilter::of_kind(EntityKind::Conversation)).await?;
                let summaries = self
                    .storage
                    .list_by_owner(user_id, &ListFilter::of_kind(EntityKind::Summary))
                    .await?;
                let ids = convs
                    .into_iter()
                    .map(|c| c.id.to_string())
                    .chain(summaries.into_iter().map(|s| s.id().to_owned()));
                self.delete_ids(user_id, ids).await?
            }
            DeleteScope::Preferences => self.delete_ids(user_id, [UserPreferences::id_for(user_id)]).await?,
            DeleteScope::SpecificConversations => {
                let Some(wanted) = options.conversation_ids.as_ref().filter(|ids| !ids.is_empty()) else {
                    return Err(MemoryError::Validation(
                        "specific_conversations scope requires conversation_ids".into(),
                    ));
                };
                // Only ids owned by this user are touched.
                let owned = self.conversations(user_id, ListFilter::of_kind(EntityKind::Conversation)).await?;
                let ids = owned
                    .into_iter()
                    .map(|c| c.id.to_string())
                    .filter(|id| wanted.contains(id));
                self.delete_ids(user_id, ids).await?
            }
            DeleteScope::DateRange => {
                if options.date_range_start.is_none() && options.date_range_end.is_none() {
                    return Err(MemoryError::Validation("date_range scope requires a start or end".into()));
                }
                let mut filter = ListFilter::of_kind(EntityKind::Conversation);
                filter.since = options.date_range_start;
                filter.until = options.date_range_end;
                let ids = self
                    .conversations(user_id, filter)
                    .await?
                    .into_iter()
                    .map(|c| c.id.to_string());
                self.delete_ids(user_id, ids).await?
            }
        };
        info!(
            user_id,
            scope = ?options.scope,
            removed,
            reason = options.reason.as_deref().unwrap_or("-"),
            "user data deleted"
        );
        Ok(removed)
    }

    async fn export_user_data(&self, user_id: &str) -> Result<UserDataExport> {
        let entities = self.storage.list_by_owner(user_id, &ListFilter::default()).await?;
        let mut export = UserDataExport {
            user_id: user_id.to_owned(),
            export_timestamp: Utc::now(),
            conversations: Vec::new(),
            preferences: None,
            privacy_settings: None,
        };
        for entity in entities {
            match entity {
                Entity::Conversation(c) => export.conversations.push(c),
                Entity::Preferences(p) => export.preferences = Some(p),
                Entity::Privacy(p) => export.privacy_settings = Some(p),
                Entity::Summary(_) => {}
            }
        }
        info!(user_id, conversations = export.conversations.len(), "user data exported");
        Ok(export)
    }

    async fn update_privacy_settings(&self, user_id: &str, mut settings: PrivacySettings) -> Result<()> {
        if settings.user_id != user_id {
            return Err(MemoryError::Validation(format!(
                "privacy settings belong to {}, not {user_id}",
                settings.user_id
            )));
        }
        settings.id = PrivacySettings::id_for(user_id);
        settings.last_updated = Utc::now();
        self.storage.store(settings.into()).await
    }

    async fn get_privacy_settings(&self, user_id: &str) -> Result<PrivacySettings> {
        self.privacy_for(user_id).await
    }

    async fn health_check(&self) -> bool {
        self.storage.health_check().await
    }
}

fn matches_topics(conversation: &Conversation, topics: &[String]) -> bool {
    if topics.is_empty() {
        return true;
    }
    topics.iter().any(|topic| {
        let topic = topic.to_lowercase();
        conversation
            .metadata
            .topics
            .iter()
            .chain(conversation.tags.iter())
            .any(|t| t.to_lowercase() == topic)
    })
}

/// Fraction of `keywords` that occur in `text`.
fn keyword_score(text: &str, keywords: &[String]) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    let lower = text.to_lowercase();
    let matched = keywords.iter().filter(|k| lower.contains(k.as_str())).count();
    matched as f64 / keywords.len() as f64
}

fn snippet(text: &str) -> String {
    match text.char_indices().nth(SNIPPET_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_owned(),
    }
}
