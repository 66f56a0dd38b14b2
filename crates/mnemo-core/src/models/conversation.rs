use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, MessageId};
use crate::models::entity::IntegrityRecord;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    #[default]
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tokens: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationMetadata {
    #[serde(default)]
    pub total_messages: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub topics: Vec<String>,
    /// Side-channel checksum record. Never part of the checksummed bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<IntegrityRecord>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: ConversationMetadata,
}

impl Conversation {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            id: ConversationId::new(),
            user_id: user_id.into(),
            timestamp: Utc::now(),
            messages: Vec::new(),
            summary: None,
            tags: Vec::new(),
            metadata: ConversationMetadata::default(),
        }
    }

    /// Appends messages, refreshes the derived counters and moves the
    /// conversation timestamp onto the first message when it falls outside
    /// the message window.
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages.extend(messages);
        self.refresh_metadata();
        self.align_timestamp();
        self
    }

    /// A conversation starts no earlier than its first message and no later
    /// than an hour after its last one.
    pub fn align_timestamp(&mut self) {
        if let (Some(first), Some(last)) = (self.messages.first(), self.messages.last()) {
            if self.timestamp < first.timestamp || self.timestamp > last.timestamp + chrono::Duration::hours(1) {
                self.timestamp = first.timestamp;
            }
        }
    }

    pub fn refresh_metadata(&mut self) {
        self.metadata.total_messages = self.messages.len() as u64;
        let tokens: u64 = self.messages.iter().filter_map(|m| m.tokens).sum();
        if tokens > 0 {
            self.metadata.total_tokens = Some(tokens as i64);
        }
        if let (Some(first), Some(last)) = (self.messages.first(), self.messages.last()) {
            let secs = (last.timestamp - first.timestamp).num_milliseconds() as f64 / 1000.0;
            self.metadata.duration_seconds = Some(secs);
        }
    }

    pub fn latest_messages(&self, count: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(count);
        &self.messages[start..]
    }
}

/// A user message together with the assistant's reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageExchange {
    pub user_message: Message,
    pub assistant_message: Message,
    pub exchange_timestamp: DateTime<Utc>,
}

impl MessageExchange {
    pub fn new(user_message: Message, assistant_message: Message) -> Self {
        Self {
            user_message,
            assistant_message,
            exchange_timestamp: Utc::now(),
        }
    }
}
