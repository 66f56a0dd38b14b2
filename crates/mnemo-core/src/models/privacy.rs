use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::conversation::Conversation;
use crate::models::entity::EntityMetadata;
use crate::models::preferences::UserPreferences;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyMode {
    #[default]
    FullMemory,
    LimitedMemory,
    NoMemory,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataRetentionPolicy {
    #[serde(rename = "indefinite")]
    Indefinite,
    #[serde(rename = "30_days")]
    Days30,
    #[default]
    #[serde(rename = "90_days")]
    Days90,
    #[serde(rename = "365_days")]
    Days365,
    #[serde(rename = "session_only")]
    SessionOnly,
}

impl DataRetentionPolicy {
    pub fn retention_days(&self) -> Option<i64> {
        match self {
            Self::Indefinite | Self::SessionOnly => None,
            Self::Days30 => Some(30),
            Self::Days90 => Some(90),
            Self::Days365 => Some(365),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrivacySettings {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub privacy_mode: PrivacyMode,
    #[serde(default)]
    pub data_retention_policy: DataRetentionPolicy,
    #[serde(default = "default_true")]
    pub allow_preference_learning: bool,
    #[serde(default = "default_true")]
    pub allow_search_indexing: bool,
    #[serde(default)]
    pub share_analytics: bool,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub metadata: EntityMetadata,
}

fn default_true() -> bool {
    true
}

impl PrivacySettings {
    pub fn id_for(user_id: &str) -> String {
        format!("privacy_{user_id}")
    }

    /// The defaults applied when a user has never saved settings.
    pub fn defaults_for(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            id: Self::id_for(&user_id),
            user_id,
            privacy_mode: PrivacyMode::default(),
            data_retention_policy: DataRetentionPolicy::default(),
            allow_preference_learning: true,
            allow_search_indexing: true,
            share_analytics: false,
            last_updated: Utc::now(),
            metadata: EntityMetadata::default(),
        }
    }

    pub fn is_memory_enabled(&self) -> bool {
        self.privacy_mode != PrivacyMode::NoMemory
    }

    pub fn allows_long_term_storage(&self) -> bool {
        self.data_retention_policy != DataRetentionPolicy::SessionOnly
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteScope {
    #[default]
    AllData,
    Conversations,
    Preferences,
    SpecificConversations,
    DateRange,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteOptions {
    #[serde(default)]
    pub scope: DeleteScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range_end: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DeleteOptions {
    pub fn all() -> Self {
        Self::default()
    }
}

/// Everything held about one user, as handed back by an export request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserDataExport {
    pub user_id: String,
    pub export_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub conversations: Vec<Conversation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<UserPreferences>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy_settings: Option<PrivacySettings>,
}

impl UserDataExport {
    pub fn total_messages(&self) -> usize {
        self.conversations.iter().map(|c| c.messages.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_policy_wire_names() {
        assert_eq!(serde_json::to_string(&DataRetentionPolicy::Days30).unwrap(), r#""30_days""#);
        assert_eq!(
            serde_json::from_str::<DataRetentionPolicy>(r#""session_only""#).unwrap(),
            DataRetentionPolicy::SessionOnly
        );
    }

    #[test]
    fn default_settings_enable_memory() {
        let settings = PrivacySettings::defaults_for("u1");
        assert_eq!(settings.id, "privacy_u1");
        assert!(settings.is_memory_enabled());
        assert!(settings.allows_long_term_storage());
        assert_eq!(settings.data_retention_policy.retention_days(), Some(90));
    }

    #[test]
    fn delete_options_default_to_all_data() {
        assert_eq!(DeleteOptions::all().scope, DeleteScope::AllData);
    }
}
