//! Degraded, cache-only context path.
//!
//! Holds the last few messages per user in process memory so that context
//! retrieval keeps answering while the primary path is down. Nothing here
//! can fail: every operation returns a value, possibly an empty one.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

use mnemo_core::ids::SummaryId;
use mnemo_core::models::{
    Conversation, ConversationContext, ConversationSummary, EntityMetadata, Message, MessageExchange, MessageRole,
    UserPreferences,
};
use mnemo_settings::FallbackSettings;

const EXCERPT_CHARS: usize = 100;
const MAX_TOPICS: usize = 5;

const TOPIC_PATTERNS: &[(&str, &[&str])] = &[
    ("programming", &["code", "coding", "program", "function", "script"]),
    ("help", &["help", "assist", "support", "problem"]),
    ("question", &["what", "how", "why", "when", "where"]),
    ("error", &["error", "bug", "issue", "problem", "fix"]),
    ("learning", &["learn", "teach", "explain", "understand"]),
];

#[derive(Clone, Debug)]
pub struct FallbackConfig {
    pub max_users: usize,
    pub max_messages_per_user: usize,
    pub context_messages: usize,
    pub idle_ttl: Duration,
    pub eviction_fraction: f64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self::from_settings(&FallbackSettings::default())
    }
}

impl FallbackConfig {
    pub fn from_settings(settings: &FallbackSettings) -> Self {
        Self {
            max_users: settings.max_users.max(1),
            max_messages_per_user: settings.max_messages_per_user.max(1),
            context_messages: settings.context_messages,
            idle_ttl: Duration::from_secs(settings.idle_ttl_secs),
            eviction_fraction: settings.eviction_fraction.clamp(0.0, 1.0),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FallbackCacheStats {
    pub cached_users: usize,
    pub total_cached_messages: usize,
    pub average_messages_per_user: f64,
    pub cache_utilization: f64,
    pub max_users: usize,
}

struct UserCache {
    messages: VecDeque<Message>,
    last_updated: Instant,
}

pub struct FallbackContext {
    config: FallbackConfig,
    cache: Mutex<HashMap<String, UserCache>>,
}

impl Default for FallbackContext {
    fn default() -> Self {
        Self::new(FallbackConfig::default())
    }
}

impl FallbackContext {
    pub fn new(config: FallbackConfig) -> Self {
        Self {
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &FallbackConfig {
        &self.config
    }

    /// Append messages to a user's recent list, oldest evicted first.
    pub fn cache_messages(&self, user_id: &str, messages: impl IntoIterator<Item = Message>) {
        let mut cache = self.cache.lock();
        let entry = cache.entry(user_id.to_owned()).or_insert_with(|| UserCache {
            messages: VecDeque::new(),
            last_updated: Instant::now(),
        });
        entry.messages.extend(messages);
        let excess = entry.messages.len().saturating_sub(self.config.max_messages_per_user);
        let _ = entry.messages.drain(..excess);
        entry.last_updated = Instant::now();
        debug!(user_id, cached = entry.messages.len(), "fallback cache updated");

        self.enforce_capacity(&mut cache);
    }

    pub fn cache_conversation(&self, user_id: &str, conversation: &Conversation) {
        self.cache_messages(user_id, conversation.messages.iter().cloned());
    }

    pub fn add_exchange(&self, user_id: &str, exchange: MessageExchange) {
        self.cache_messages(user_id, [exchange.user_message, exchange.assistant_message]);
    }

    /// Context from whatever is cached. Never fails and always belongs to
    /// `user_id`, even for users the cache has never seen.
    pub fn build_context(&self, user_id: &str, limit: Option<usize>) -> ConversationContext {
        let take = limit.unwrap_or(self.config.context_messages);
        let recent: Vec<Message> = {
            let cache = self.cache.lock();
            cache
                .get(user_id)
                .map(|c| {
                    let skip = c.messages.len().saturating_sub(take);
                    c.messages.iter().skip(skip).cloned().collect()
                })
                .unwrap_or_default()
        };

        ConversationContext {
            user_id: user_id.to_owned(),
            context_summary: mode_summary(&recent),
            recent_messages: recent,
            relevant_history: Vec::new(),
            user_preferences: Some(UserPreferences::new(user_id)),
            context_timestamp: Utc::now(),
        }
    }

    /// Degraded mode does no historical ranking.
    pub fn relevant_history(&self, _user_id: &str, _current_message: &str) -> Vec<ConversationSummary> {
        Vec::new()
    }

    /// First/last message extract plus keyword topics.
    pub fn summarize_conversation(&self, conversation: &Conversation) -> ConversationSummary {
        let summary_text = match (conversation.messages.first(), conversation.messages.last()) {
            (Some(first), Some(last)) if conversation.messages.len() > 1 => format!(
                "Started with: {} | Ended with: {}",
                excerpt(&first.content),
                excerpt(&last.content)
            ),
            (Some(first), _) => format!("Started with: {}", excerpt(&first.content)),
            _ => "Empty conversation".to_owned(),
        };

        ConversationSummary {
            id: SummaryId::new(),
            user_id: conversation.user_id.clone(),
            conversation_id: conversation.id.to_string(),
            timestamp: conversation.timestamp,
            summary_text,
            key_topics: basic_topics(&conversation.messages),
            importance_score: 0.5,
            message_count: conversation.messages.len() as i64,
            metadata: EntityMetadata::default(),
        }
    }

    /// Drop one user's cache if it has been idle past the TTL.
    pub fn prune_user(&self, user_id: &str) -> bool {
        let mut cache = self.cache.lock();
        let idle = cache
            .get(user_id)
            .is_some_and(|c| c.last_updated.elapsed() > self.config.idle_ttl);
        if idle {
            let _ = cache.remove(user_id);
            info!(user_id, "pruned idle fallback context");
        }
        idle
    }

    pub fn forget_user(&self, user_id: &str) -> bool {
        self.cache.lock().remove(user_id).is_some()
    }

    /// Drop every idle user. Returns how many were removed.
    pub fn prune_idle(&self) -> usize {
        let ttl = self.config.idle_ttl;
        let mut cache = self.cache.lock();
        let before = cache.len();
        cache.retain(|_, c| c.last_updated.elapsed() <= ttl);
        let removed = before - cache.len();
        if removed > 0 {
            info!(removed, "pruned idle fallback contexts");
        }
        removed
    }

    /// Returns how many users were dropped.
    pub fn clear(&self) -> usize {
        let mut cache = self.cache.lock();
        let removed = cache.len();
        cache.clear();
        info!(removed, "fallback cache cleared");
        removed
    }

    pub fn cached_users(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn cache_stats(&self) -> FallbackCacheStats {
        let cache = self.cache.lock();
        let users = cache.len();
        let total: usize = cache.values().map(|c| c.messages.len()).sum();
        FallbackCacheStats {
            cached_users: users,
            total_cached_messages: total,
            average_messages_per_user: if users == 0 { 0.0 } else { total as f64 / users as f64 },
            cache_utilization: users as f64 / self.config.max_users as f64,
            max_users: self.config.max_users,
        }
    }

    fn enforce_capacity(&self, cache: &mut HashMap<String, UserCache>) {
        if cache.len() <= self.config.max_users {
            return;
        }
        let fraction = (self.config.max_users as f64 * self.config.eviction_fraction) as usize;
        let remove = fraction.max(cache.len() - self.config.max_users);

        let mut by_age: Vec<(String, Instant)> = cache.iter().map(|(k, c)| (k.clone(), c.last_updated)).collect();
        by_age.sort_by_key(|(_, at)| *at);
        for (user, _) in by_age.into_iter().take(remove) {
            let _ = cache.remove(&user);
        }
        info!(removed = remove, "evicted least recently updated fallback contexts");
    }
}

fn mode_summary(recent: &[Message]) -> String {
    let Some(last) = recent.last() else {
        return "Fallback mode: no cached messages".to_owned();
    };
    let minutes = (Utc::now() - last.timestamp).num_minutes().max(0);
    let ago = if minutes < 60 {
        format!("{minutes} minutes ago")
    } else {
        format!("{} hours ago", minutes / 60)
    };
    format!("Fallback mode: {} recent messages | Last message {ago}", recent.len())
}

fn excerpt(content: &str) -> String {
    match content.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_owned(),
    }
}

fn basic_topics(messages: &[Message]) -> Vec<String> {
    let text = messages
        .iter()
        .filter(|m| m.role == MessageRole::User)
        .map(|m| m.content.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    TOPIC_PATTERNS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map(|(topic, _)| (*topic).to_owned())
        .take(MAX_TOPICS)
        .collect()
}
