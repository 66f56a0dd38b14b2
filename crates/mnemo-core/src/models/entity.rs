use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::MemoryError;
use crate::models::context::ConversationSummary;
use crate::models::conversation::Conversation;
use crate::models::preferences::UserPreferences;
use crate::models::privacy::PrivacySettings;

pub const CHECKSUM_ALGORITHM: &str = "sha256";

/// Checksum attached to a persisted entity under `metadata.integrity`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityRecord {
    pub checksum: String,
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    #[serde(alias = "computed_at")]
    pub computed_at: DateTime<Utc>,
    #[serde(alias = "schema_version")]
    pub schema_version: String,
}

fn default_algorithm() -> String {
    CHECKSUM_ALGORITHM.into()
}

impl IntegrityRecord {
    pub fn new(checksum: impl Into<String>, schema_version: impl Into<String>) -> Self {
        Self {
            checksum: checksum.into(),
            algorithm: default_algorithm(),
            computed_at: Utc::now(),
            schema_version: schema_version.into(),
        }
    }
}

/// Metadata block shared by the entity kinds that have no richer metadata of their own.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<IntegrityRecord>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Conversation,
    Summary,
    Preferences,
    Privacy,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::Summary => "summary",
            Self::Preferences => "preferences",
            Self::Privacy => "privacy",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = MemoryError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conversation" => Ok(Self::Conversation),
            "summary" => Ok(Self::Summary),
            "preferences" => Ok(Self::Preferences),
            "privacy" => Ok(Self::Privacy),
            other => Err(MemoryError::Validation(format!("unknown entity kind: {other}"))),
        }
    }
}

/// Any record the storage layer persists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Conversation(Conversation),
    Summary(ConversationSummary),
    Preferences(UserPreferences),
    Privacy(PrivacySettings),
}

impl Entity {
    pub fn id(&self) -> &str {
        match self {
            Self::Conversation(c) => c.id.as_str(),
            Self::Summary(s) => s.id.as_str(),
            Self::Preferences(p) => &p.id,
            Self::Privacy(p) => &p.id,
        }
    }

    pub fn owner_id(&self) -> &str {
        match self {
            Self::Conversation(c) => &c.user_id,
            Self::Summary(s) => &s.user_id,
            Self::Preferences(p) => &p.user_id,
            Self::Privacy(p) => &p.user_id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Conversation(_) => EntityKind::Conversation,
            Self::Summary(_) => EntityKind::Summary,
            Self::Preferences(_) => EntityKind::Preferences,
            Self::Privacy(_) => EntityKind::Privacy,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Conversation(c) => c.timestamp,
            Self::Summary(s) => s.timestamp,
            Self::Preferences(p) => p.last_updated,
            Self::Privacy(p) => p.last_updated,
        }
    }

    fn integrity_slot(&mut self) -> &mut Option<IntegrityRecord> {
        match self {
            Self::Conversation(c) => &mut c.metadata.integrity,
            Self::Summary(s) => &mut s.metadata.integrity,
            Self::Preferences(p) => &mut p.metadata.integrity,
            Self::Privacy(p) => &mut p.metadata.integrity,
        }
    }

    pub fn integrity(&self) -> Option<&IntegrityRecord> {
        match self {
            Self::Conversation(c) => c.metadata.integrity.as_ref(),
            Self::Summary(s) => s.metadata.integrity.as_ref(),
            Self::Preferences(p) => p.metadata.integrity.as_ref(),
            Self::Privacy(p) => p.metadata.integrity.as_ref(),
        }
    }

    pub fn set_integrity(&mut self, record: Option<IntegrityRecord>) {
        *self.integrity_slot() = record;
    }

    pub fn take_integrity(&mut self) -> Option<IntegrityRecord> {
        self.integrity_slot().take()
    }

    pub fn to_value(&self) -> Result<serde_json::Value, MemoryError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, MemoryError> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn as_conversation(&self) -> Option<&Conversation> {
        match self {
            Self::Conversation(c) => Some(c),
            _ => None,
        }
    }
}

impl From<Conversation> for Entity {
    fn from(c: Conversation) -> Self {
        Self::Conversation(c)
    }
}

impl From<ConversationSummary> for Entity {
    fn from(s: ConversationSummary) -> Self {
        Self::Summary(s)
    }
}

impl From<UserPreferences> for Entity {
    fn from(p: UserPreferences) -> Self {
        Self::Preferences(p)
    }
}

impl From<PrivacySettings> for Entity {
    fn from(p: PrivacySettings) -> Self {
        Self::Privacy(p)
    }
}

/// Narrowing applied by `list_by_owner`.
#[derive(Clone, Debug, Default)]
pub struct ListFilter {
    pub kind: Option<EntityKind>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl ListFilter {
    pub fn of_kind(kind: EntityKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        if self.kind.is_some_and(|k| k != entity.kind()) {
            return false;
        }
        let ts = entity.timestamp();
        self.since.map_or(true, |s| ts >= s) && self.until.map_or(true, |u| ts <= u)
    }
}
