use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SummaryId;
use crate::models::conversation::Message;
use crate::models::entity::EntityMetadata;
use crate::models::preferences::UserPreferences;

/// Condensed view of a past conversation, used when building context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: SummaryId,
    pub user_id: String,
    pub conversation_id: String,
    pub timestamp: DateTime<Utc>,
    pub summary_text: String,
    #[serde(default)]
    pub key_topics: Vec<String>,
    #[serde(default)]
    pub importance_score: f64,
    #[serde(default)]
    pub message_count: i64,
    #[serde(default)]
    pub metadata: EntityMetadata,
}

/// Everything a caller needs to continue a conversation with a user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub user_id: String,
    #[serde(default)]
    pub recent_messages: Vec<Message>,
    #[serde(default)]
    pub relevant_history: Vec<ConversationSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_preferences: Option<UserPreferences>,
    #[serde(default)]
    pub context_summary: String,
    pub context_timestamp: DateTime<Utc>,
}

impl ConversationContext {
    pub fn empty(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            recent_messages: Vec::new(),
            relevant_history: Vec::new(),
            user_preferences: None,
            context_summary: String::new(),
            context_timestamp: Utc::now(),
        }
    }

    /// Plain-text rendering: summary, relevant history, last five messages.
    pub fn context_text(&self) -> String {
        let mut parts = Vec::new();
        if !self.context_summary.is_empty() {
            parts.push(format!("Context Summary: {}", self.context_summary));
        }
        if !self.relevant_history.is_empty() {
            let lines: Vec<String> = self
                .relevant_history
                .iter()
                .map(|s| format!("- {} (Topics: {})", s.summary_text, s.key_topics.join(", ")))
                .collect();
            parts.push(format!("Relevant History:\n{}", lines.join("\n")));
        }
        if !self.recent_messages.is_empty() {
            let start = self.recent_messages.len().saturating_sub(5);
            let lines: Vec<String> = self.recent_messages[start..]
                .iter()
                .map(|m| format!("{}: {}", m.role.as_str(), m.content))
                .collect();
            parts.push(format!("Recent Messages:\n{}", lines.join("\n")));
        }
        parts.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_context_renders_nothing() {
        assert_eq!(ConversationContext::empty("u1").context_text(), "");
    }

    #[test]
    fn context_text_includes_last_five_messages() {
        let mut ctx = ConversationContext::empty("u1");
        ctx.context_summary = "recent chat".into();
        for i in 0..7 {
            ctx.recent_messages.push(Message::user(format!("m{i}")));
        }
        let text = ctx.context_text();
        assert!(text.starts_with("Context Summary: recent chat"));
        assert!(!text.contains("user: m1"));
        assert!(text.contains("user: m2"));
        assert!(text.contains("user: m6"));
    }
}
