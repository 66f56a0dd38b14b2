use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Suffix fragments that mark a string as cut off mid-write.
const TRUNCATION_SUFFIXES: &[&str] = &["trunca", "corrup", "incom"];

/// Strings this short are never flagged as truncated.
const TRUNCATION_MIN_CHARS: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorruptionPattern {
    NullBytes,
    EncodingIssues,
    Truncation,
}

impl CorruptionPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NullBytes => "null_bytes",
            Self::EncodingIssues => "encoding_issues",
            Self::Truncation => "truncation",
        }
    }
}

impl fmt::Display for CorruptionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scans every string in a JSON tree for known corruption signatures.
#[derive(Clone, Copy, Debug, Default)]
pub struct CorruptionDetector;

impl CorruptionDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn detect_patterns(&self, data: &Value) -> BTreeSet<CorruptionPattern> {
        let mut found = BTreeSet::new();
        scan(data, &mut found);
        found
    }

    pub fn is_clean(&self, data: &Value) -> bool {
        self.detect_patterns(data).is_empty()
    }

    pub fn detect_in_str(&self, s: &str) -> BTreeSet<CorruptionPattern> {
        let mut found = BTreeSet::new();
        scan_str(s, &mut found);
        found
    }
}

fn scan(value: &Value, found: &mut BTreeSet<CorruptionPattern>) {
    match value {
        Value::String(s) => scan_str(s, found),
        Value::Array(items) => items.iter().for_each(|v| scan(v, found)),
        Value::Object(map) => {
            for (key, v) in map {
                scan_str(key, found);
                scan(v, found);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

fn scan_str(s: &str, found: &mut BTreeSet<CorruptionPattern>) {
    if s.contains('\u{0000}') {
        let _ = found.insert(CorruptionPattern::NullBytes);
    }
    if s.contains('\u{FFFD}') {
        let _ = found.insert(CorruptionPattern::EncodingIssues);
    }
    if looks_truncated(s) {
        let _ = found.insert(CorruptionPattern::Truncation);
    }
}

fn looks_truncated(s: &str) -> bool {
    if s.chars().count() <= TRUNCATION_MIN_CHARS {
        return false;
    }
    let lower = s.to_lowercase();
    TRUNCATION_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detect(v: Value) -> BTreeSet<CorruptionPattern> {
        CorruptionDetector::new().detect_patterns(&v)
    }

    #[test]
    fn clean_data_has_no_patterns() {
        assert!(detect(json!({"id": "c1", "messages": [{"content": "hello there"}]})).is_empty());
        assert!(CorruptionDetector::new().is_clean(&json!(null)));
    }

    #[test]
    fn finds_null_bytes_in_nested_arrays() {
        let found = detect(json!({"messages": [{"content": "ok"}, {"content": "bad\u{0000}"}]}));
        assert_eq!(found, BTreeSet::from([CorruptionPattern::NullBytes]));
    }

    #[test]
    fn finds_replacement_characters() {
        let found = detect(json!({"meta": {"deep": {"s": "caf\u{FFFD}"}}}));
        assert!(found.contains(&CorruptionPattern::EncodingIssues));
    }

    #[test]
    fn truncation_requires_length_and_suffix() {
        assert!(detect(json!("the message was incom")).contains(&CorruptionPattern::Truncation));
        assert!(detect(json!("data is CORRUP")).contains(&CorruptionPattern::Truncation));
        assert!(detect(json!("incom")).is_empty());
        assert!(detect(json!("this sentence is complete")).is_empty());
    }

    #[test]
    fn returns_union_of_patterns() {
        let found = detect(json!(["a\u{0000}", "b\u{FFFD}", "something got trunca"]));
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn ignores_non_string_scalars() {
        assert!(detect(json!({"n": 0, "b": false, "x": null})).is_empty());
    }
}
