use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::entity::EntityMetadata;

/// Tones the response layer knows how to produce.
pub const KNOWN_TONES: &[&str] = &["formal", "casual", "friendly", "professional", "neutral", "helpful"];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStyleType {
    Concise,
    Detailed,
    #[default]
    Conversational,
    Technical,
    Casual,
    Formal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseStyle {
    #[serde(default)]
    pub style_type: ResponseStyleType,
    /// Free-form on the wire; checked against [`KNOWN_TONES`] on write.
    #[serde(default = "default_tone")]
    pub tone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_length: Option<String>,
    #[serde(default = "default_true")]
    pub include_examples: bool,
    #[serde(default)]
    pub confidence: f64,
}

fn default_tone() -> String {
    "helpful".into()
}

fn default_true() -> bool {
    true
}

impl Default for ResponseStyle {
    fn default() -> Self {
        Self {
            style_type: ResponseStyleType::default(),
            tone: default_tone(),
            preferred_length: None,
            include_examples: true,
            confidence: 0.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommunicationPreferences {
    #[serde(default)]
    pub prefers_step_by_step: bool,
    #[serde(default = "default_true")]
    pub prefers_code_examples: bool,
    #[serde(default)]
    pub prefers_bullet_points: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Default for CommunicationPreferences {
    fn default() -> Self {
        Self {
            prefers_step_by_step: false,
            prefers_code_examples: true,
            prefers_bullet_points: false,
            language: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub response_style: ResponseStyle,
    #[serde(default)]
    pub communication: CommunicationPreferences,
    #[serde(default = "default_true")]
    pub learning_enabled: bool,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub metadata: EntityMetadata,
}

impl UserPreferences {
    /// Preferences are one-per-user, so the id is derived from the owner.
    pub fn id_for(user_id: &str) -> String {
        format!("prefs_{user_id}")
    }

    pub fn new(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            id: Self::id_for(&user_id),
            user_id,
            response_style: ResponseStyle::default(),
            communication: CommunicationPreferences::default(),
            learning_enabled: true,
            last_updated: Utc::now(),
            metadata: EntityMetadata::default(),
        }
    }
}
