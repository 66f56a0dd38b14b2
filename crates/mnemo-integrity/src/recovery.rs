//! Best-effort repair of corrupted entity payloads.
//!
//! Repairs never invent identity: ids and owner references either survive
//! cleaning or the payload is unrecoverable. Required text that did not
//! survive is replaced with an explicit sentinel so readers can tell.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use mnemo_core::ids::{ConversationId, MessageId, SummaryId};
use mnemo_core::models::{
    CommunicationPreferences, Conversation, ConversationMetadata, ConversationSummary, Entity, EntityKind,
    EntityMetadata, Message, MessageRole, ResponseStyle, UserPreferences, KNOWN_TONES,
};

pub const CONTENT_SENTINEL: &str = "[content corrupted — unable to recover]";
pub const SUMMARY_SENTINEL: &str = "[summary corrupted — unable to recover]";

/// Fields whose emptiness makes a payload unrecoverable by generic cleaning.
const IDENTITY_FIELDS: &[&str] = &["id", "user_id"];
const CONTENT_FIELDS: &[&str] = &["content", "summary_text"];

const DEFAULT_IMPORTANCE: f64 = 0.5;

#[derive(Clone, Copy, Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// Strip NUL and U+FFFD from every string in the tree.
    ///
    /// Returns `None` when `id` is absent or empty afterwards, when a present
    /// `user_id` is empty, or when a present primary content field is empty.
    pub fn attempt_generic_recovery(&self, data: &Value) -> Option<Value> {
        let cleaned = clean_value(data);
        let obj = cleaned.as_object()?;

        if non_empty_str(obj, "id").is_none() {
            debug!("generic recovery failed: id missing after cleaning");
            return None;
        }
        for field in IDENTITY_FIELDS.iter().chain(CONTENT_FIELDS) {
            if obj.contains_key(*field) && non_empty_str(obj, field).is_none() {
                debug!(field = *field, "generic recovery failed: required field empty after cleaning");
                return None;
            }
        }
        Some(cleaned)
    }

    /// Rebuild a minimally valid entity of `kind` from whatever survives.
    pub fn attempt_typed_recovery(&self, data: &Value, kind: EntityKind) -> Option<Entity> {
        let cleaned = clean_value(data);
        let obj = cleaned.as_object()?;
        let recovered = match kind {
            EntityKind::Conversation => recover_conversation(obj).map(Entity::from),
            EntityKind::Summary => recover_summary(obj).map(Entity::from),
            EntityKind::Preferences => recover_preferences(obj).map(Entity::from),
            // Privacy choices are never guessed.
            EntityKind::Privacy => None,
        };
        if recovered.is_none() {
            debug!(kind = %kind, "typed recovery failed: identity not recoverable");
        }
        recovered
    }
}

pub fn clean_str(s: &str) -> String {
    s.chars().filter(|c| *c != '\u{0000}' && *c != '\u{FFFD}').collect()
}

pub fn clean_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(clean_str(s)),
        Value::Array(items) => Value::Array(items.iter().map(clean_value).collect()),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (clean_str(k), clean_value(v))).collect()),
        other => other.clone(),
    }
}

fn non_empty_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn timestamp_field(obj: &Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    obj.get(key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn lenient<T: DeserializeOwned + Default>(obj: &Map<String, Value>, key: &str) -> T {
    obj.get(key)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

fn string_list(obj: &Map<String, Value>, key: &str) -> Vec<String> {
    obj.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn recover_message(value: &Value, fallback_ts: DateTime<Utc>) -> Option<Message> {
    let obj = value.as_object()?;
    let id = non_empty_str(obj, "id")?;
    let role = obj
        .get("role")
        .and_then(|v| serde_json::from_value::<MessageRole>(v.clone()).ok())
        .unwrap_or(MessageRole::User);
    let content = non_empty_str(obj, "content").unwrap_or(CONTENT_SENTINEL);
    Some(Message {
        id: MessageId::from_raw(id),
        role,
        content: content.to_owned(),
        timestamp: timestamp_field(obj, "timestamp").unwrap_or(fallback_ts),
        tokens: obj.get("tokens").and_then(Value::as_u64),
    })
}

fn recover_conversation(obj: &Map<String, Value>) -> Option<Conversation> {
    let id = non_empty_str(obj, "id")?;
    let user_id = non_empty_str(obj, "user_id")?;
    let declared_ts = timestamp_field(obj, "timestamp");

    let fallback_ts = declared_ts.unwrap_or_else(Utc::now);
    let mut messages: Vec<Message> = obj
        .get("messages")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|m| recover_message(m, fallback_ts)).collect())
        .unwrap_or_default();
    messages.sort_by_key(|m| m.timestamp);

    // Keep the conversation timestamp inside the window validation expects.
    let timestamp = match (declared_ts, messages.first(), messages.last()) {
        (Some(ts), Some(first), Some(last))
            if ts < first.timestamp || ts > last.timestamp + chrono::Duration::hours(1) =>
        {
            first.timestamp
        }
        (Some(ts), _, _) => ts,
        (None, Some(first), _) => first.timestamp,
        (None, None, _) => Utc::now(),
    };

    let mut metadata: ConversationMetadata = lenient(obj, "metadata");
    metadata.integrity = None;
    if metadata.total_tokens.is_some_and(|t| t < 0) {
        metadata.total_tokens = None;
    }
    if metadata.duration_seconds.is_some_and(|d| d < 0.0 || !d.is_finite()) {
        metadata.duration_seconds = None;
    }

    let mut conversation = Conversation {
        id: ConversationId::from_raw(id),
        user_id: user_id.to_owned(),
        timestamp,
        messages,
        summary: non_empty_str(obj, "summary").map(str::to_owned),
        tags: string_list(obj, "tags"),
        metadata,
    };
    conversation.refresh_metadata();
    Some(conversation)
}

fn recover_summary(obj: &Map<String, Value>) -> Option<ConversationSummary> {
    let id = non_empty_str(obj, "id")?;
    let user_id = non_empty_str(obj, "user_id")?;
    let conversation_id = non_empty_str(obj, "conversation_id")?;

    let importance_score = obj
        .get("importance_score")
        .and_then(Value::as_f64)
        .filter(|s| s.is_finite())
        .map_or(DEFAULT_IMPORTANCE, |s| s.clamp(0.0, 1.0));

    let mut metadata: EntityMetadata = lenient(obj, "metadata");
    metadata.integrity = None;

    Some(ConversationSummary {
        id: SummaryId::from_raw(id),
        user_id: user_id.to_owned(),
        conversation_id: conversation_id.to_owned(),
        timestamp: timestamp_field(obj, "timestamp").unwrap_or_else(Utc::now),
        summary_text: non_empty_str(obj, "summary_text").unwrap_or(SUMMARY_SENTINEL).to_owned(),
        key_topics: string_list(obj, "key_topics"),
        importance_score,
        message_count: obj.get("message_count").and_then(Value::as_i64).unwrap_or(0).max(0),
        metadata,
    })
}

fn recover_preferences(obj: &Map<String, Value>) -> Option<UserPreferences> {
    let id = non_empty_str(obj, "id")?;
    let user_id = non_empty_str(obj, "user_id")?;

    let mut response_style: ResponseStyle = lenient(obj, "response_style");
    if !KNOWN_TONES.contains(&response_style.tone.as_str()) {
        response_style.tone = ResponseStyle::default().tone;
    }
    if !response_style.confidence.is_finite() {
        response_style.confidence = 0.0;
    }
    response_style.confidence = response_style.confidence.clamp(0.0, 1.0);
    let communication: CommunicationPreferences = lenient(obj, "communication");

    let mut metadata: EntityMetadata = lenient(obj, "metadata");
    metadata.integrity = None;

    Some(UserPreferences {
        id: id.to_owned(),
        user_id: user_id.to_owned(),
        response_style,
        communication,
        learning_enabled: obj.get("learning_enabled").and_then(Value::as_bool).unwrap_or(true),
        last_updated: timestamp_field(obj, "last_updated").unwrap_or_else(Utc::now),
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::models::PrivacySettings;
    use serde_json::json;

    fn engine() -> RecoveryEngine {
        RecoveryEngine::new()
    }

    fn contains_bad_chars(v: &Value) -> bool {
        match v {
            Value::String(s) => s.contains('\u{0000}') || s.contains('\u{FFFD}'),
            Value::Array(items) => items.iter().any(contains_bad_chars),
            Value::Object(map) => map.values().any(contains_bad_chars),
            _ => false,
        }
    }

    // ── generic ─────────────────────────────────────────────────────────

    #[test]
    fn generic_strips_recursively() {
        let data = json!({
            "id": "c1\u{0000}",
            "content": "hel\u{FFFD}lo",
            "nested": {"list": ["a\u{0000}b", {"deep": "\u{FFFD}x"}]}
        });
        let out = engine().attempt_generic_recovery(&data).unwrap();
        assert!(!contains_bad_chars(&out));
        assert_eq!(out["id"], "c1");
        assert_eq!(out["content"], "hello");
        assert_eq!(out["nested"]["list"][0], "ab");
        assert_eq!(out["nested"]["list"][1]["deep"], "x");
    }

    #[test]
    fn generic_fails_when_id_empty_after_cleaning() {
        assert!(engine().attempt_generic_recovery(&json!({"id": "\u{0000}", "content": "x"})).is_none());
        assert!(engine().attempt_generic_recovery(&json!({"content": "x"})).is_none());
    }

    #[test]
    fn generic_fails_when_content_empty_after_cleaning() {
        assert!(engine().attempt_generic_recovery(&json!({"id": "m1", "content": "\u{FFFD}\u{0000}"})).is_none());
        assert!(engine().attempt_generic_recovery(&json!({"id": "s1", "summary_text": ""})).is_none());
        assert!(engine().attempt_generic_recovery(&json!({"id": "s1", "user_id": " "})).is_none());
    }

    #[test]
    fn generic_rejects_non_objects() {
        assert!(engine().attempt_generic_recovery(&json!("just a string")).is_none());
    }

    // ── typed ───────────────────────────────────────────────────────────

    #[test]
    fn conversation_messages_are_repaired_individually() {
        let data = json!({
            "id": "conv_1",
            "user_id": "u1",
            "timestamp": "2024-05-01T10:00:00Z",
            "messages": [
                {"id": "m1", "role": "assistant", "content": "fine\u{0000}", "timestamp": "2024-05-01T10:00:00Z"},
                {"id": "m2", "role": "robot", "content": "\u{FFFD}", "timestamp": "2024-05-01T10:01:00Z"},
                {"role": "user", "content": "no id"},
                "not an object"
            ]
        });
        let entity = engine().attempt_typed_recovery(&data, EntityKind::Conversation).unwrap();
        let conv = entity.as_conversation().unwrap();
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[0].content, "fine");
        assert_eq!(conv.messages[0].role, MessageRole::Assistant);
        assert_eq!(conv.messages[1].role, MessageRole::User);
        assert_eq!(conv.messages[1].content, CONTENT_SENTINEL);
        assert_eq!(conv.metadata.total_messages, 2);
    }

    #[test]
    fn conversation_without_owner_is_not_fabricated() {
        let data = json!({"id": "conv_1", "user_id": "\u{0000}", "messages": []});
        assert!(engine().attempt_typed_recovery(&data, EntityKind::Conversation).is_none());
        let data = json!({"user_id": "u1", "messages": []});
        assert!(engine().attempt_typed_recovery(&data, EntityKind::Conversation).is_none());
    }

    #[test]
    fn conversation_timestamp_is_pulled_into_message_window() {
        let data = json!({
            "id": "conv_1",
            "user_id": "u1",
            "timestamp": "2030-01-01T00:00:00Z",
            "messages": [{"id": "m1", "role": "user", "content": "hi", "timestamp": "2024-05-01T10:00:00Z"}]
        });
        let entity = engine().attempt_typed_recovery(&data, EntityKind::Conversation).unwrap();
        assert_eq!(entity.timestamp().to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn summary_gets_sentinel_and_clamped_importance() {
        let data = json!({
            "id": "sum_1",
            "user_id": "u1",
            "conversation_id": "conv_1",
            "summary_text": "\u{0000}",
            "importance_score": 4.2,
            "message_count": -3
        });
        let Entity::Summary(s) = engine().attempt_typed_recovery(&data, EntityKind::Summary).unwrap() else {
            panic!("expected summary");
        };
        assert_eq!(s.summary_text, SUMMARY_SENTINEL);
        assert_eq!(s.importance_score, 1.0);
        assert_eq!(s.message_count, 0);
    }

    #[test]
    fn summary_missing_importance_defaults_to_half() {
        let data = json!({"id": "sum_1", "user_id": "u1", "conversation_id": "c", "summary_text": "ok"});
        let Entity::Summary(s) = engine().attempt_typed_recovery(&data, EntityKind::Summary).unwrap() else {
            panic!("expected summary");
        };
        assert_eq!(s.importance_score, DEFAULT_IMPORTANCE);
    }

    #[test]
    fn summary_requires_conversation_reference() {
        let data = json!({"id": "sum_1", "user_id": "u1", "summary_text": "ok"});
        assert!(engine().attempt_typed_recovery(&data, EntityKind::Summary).is_none());
    }

    #[test]
    fn preferences_unknown_tone_resets() {
        let data = json!({
            "id": "prefs_u1",
            "user_id": "u1",
            "response_style": {"tone": "sarcastic\u{0000}", "style_type": "concise"}
        });
        let Entity::Preferences(p) = engine().attempt_typed_recovery(&data, EntityKind::Preferences).unwrap() else {
            panic!("expected preferences");
        };
        assert_eq!(p.response_style.tone, "helpful");
        assert!(p.learning_enabled);
    }

    #[test]
    fn privacy_is_never_reconstructed() {
        let data = Entity::from(PrivacySettings::defaults_for("u1")).to_value().unwrap();
        assert!(engine().attempt_typed_recovery(&data, EntityKind::Privacy).is_none());
    }

    #[test]
    fn recovered_entities_carry_no_integrity_record() {
        let data = json!({
            "id": "sum_1", "user_id": "u1", "conversation_id": "c", "summary_text": "ok",
            "metadata": {"integrity": {"checksum": "x", "computedAt": "2024-01-01T00:00:00Z", "schemaVersion": "1.0"}}
        });
        let entity = engine().attempt_typed_recovery(&data, EntityKind::Summary).unwrap();
        assert!(entity.integrity().is_none());
    }
}
