use std::collections::BTreeSet;

use chrono::Duration;
use serde::Serialize;

use mnemo_core::models::{
    Conversation, ConversationSummary, Entity, PrivacySettings, UserPreferences, KNOWN_TONES,
};

use crate::corruption::{CorruptionDetector, CorruptionPattern};

pub const MAX_MESSAGE_CHARS: usize = 100_000;

/// Outcome of structural and logical checks on one entity.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub patterns: BTreeSet<CorruptionPattern>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty() && self.patterns.is_empty()
    }

    /// One line suitable for a quarantine reason or error message.
    pub fn reason(&self) -> String {
        let mut parts = self.errors.clone();
        if !self.patterns.is_empty() {
            let tags: Vec<&str> = self.patterns.iter().map(CorruptionPattern::as_str).collect();
            parts.push(format!("corruption patterns: {}", tags.join(", ")));
        }
        parts.join("; ")
    }

    fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }
}

/// Domain checks applied before an entity is written and after it is read.
pub trait EntityValidator: Send + Sync {
    fn validate(&self, entity: &Entity) -> ValidationReport;
}

/// The built-in rules for the four persisted kinds, plus corruption scanning.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultValidator {
    detector: CorruptionDetector,
}

impl DefaultValidator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntityValidator for DefaultValidator {
    fn validate(&self, entity: &Entity) -> ValidationReport {
        let mut report = ValidationReport::default();
        match entity {
            Entity::Conversation(c) => check_conversation(c, &mut report),
            Entity::Summary(s) => check_summary(s, &mut report),
            Entity::Preferences(p) => check_preferences(p, &mut report),
            Entity::Privacy(p) => check_privacy(p, &mut report),
        }
        if let Ok(value) = entity.to_value() {
            report.patterns = self.detector.detect_patterns(&value);
        }
        report
    }
}

fn check_conversation(c: &Conversation, report: &mut ValidationReport) {
    if c.id.is_empty() {
        report.error("conversation id is required");
    }
    if c.user_id.trim().is_empty() {
        report.error("user_id is required");
    }

    for (i, msg) in c.messages.iter().enumerate() {
        if msg.id.is_empty() {
            report.error(format!("message {i}: id is required"));
        }
        if msg.content.trim().is_empty() {
            report.error(format!("message {i}: content is empty"));
        } else if msg.content.chars().count() > MAX_MESSAGE_CHARS {
            report.error(format!("message {i}: content exceeds {MAX_MESSAGE_CHARS} characters"));
        }
    }

    if c.messages.windows(2).any(|w| w[1].timestamp < w[0].timestamp) {
        report.error("messages are not in chronological order");
    }

    if let (Some(first), Some(last)) = (c.messages.first(), c.messages.last()) {
        if c.timestamp < first.timestamp || c.timestamp > last.timestamp + Duration::hours(1) {
            report.error("conversation timestamp is outside its message window");
        }
    }

    if c.metadata.total_tokens.is_some_and(|t| t < 0) {
        report.error("total_tokens must be non-negative");
    }
    if c.metadata.duration_seconds.is_some_and(|d| d < 0.0 || !d.is_finite()) {
        report.error("duration_seconds must be non-negative");
    }
}

fn check_summary(s: &ConversationSummary, report: &mut ValidationReport) {
    if s.id.is_empty() {
        report.error("summary id is required");
    }
    if s.user_id.trim().is_empty() {
        report.error("user_id is required");
    }
    if s.conversation_id.trim().is_empty() {
        report.error("conversation_id is required");
    }
    if s.summary_text.trim().is_empty() {
        report.error("summary_text is required");
    }
    if s.message_count < 0 {
        report.error("message_count must be non-negative");
    }
    if !(0.0..=1.0).contains(&s.importance_score) {
        report.error("importance_score must be within [0, 1]");
    }
}

fn check_preferences(p: &UserPreferences, report: &mut ValidationReport) {
    if p.id.trim().is_empty() {
        report.error("preferences id is required");
    }
    if p.user_id.trim().is_empty() {
        report.error("user_id is required");
    }
    if !KNOWN_TONES.contains(&p.response_style.tone.as_str()) {
        report.error(format!("unknown tone '{}'", p.response_style.tone));
    }
    if !(0.0..=1.0).contains(&p.response_style.confidence) {
        report.error("confidence must be within [0, 1]");
    }
}

fn check_privacy(p: &PrivacySettings, report: &mut ValidationReport) {
    if p.id.trim().is_empty() {
        report.error("privacy settings id is required");
    }
    if p.user_id.trim().is_empty() {
        report.error("user_id is required");
    }
}
