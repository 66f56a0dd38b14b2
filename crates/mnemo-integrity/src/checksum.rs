//! Canonical serialization and SHA-256 checksums.
//!
//! Canonical form: the serde JSON value of the entity with
//! `metadata.integrity` removed, written compactly with object keys in
//! byte order, strings escaped as serde_json escapes them, numbers in
//! serde_json's shortest round-trip form and timestamps as chrono's RFC 3339
//! serde output. Identical logical content always yields identical bytes.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use mnemo_core::errors::{MemoryError, Result};
use mnemo_core::models::IntegrityRecord;

#[derive(Clone, Debug)]
pub struct IntegrityChecker {
    schema_version: String,
}

impl Default for IntegrityChecker {
    fn default() -> Self {
        Self::new("1.0")
    }
}

impl IntegrityChecker {
    pub fn new(schema_version: impl Into<String>) -> Self {
        Self {
            schema_version: schema_version.into(),
        }
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    pub fn checksum<T: Serialize>(&self, entity: &T) -> Result<String> {
        Ok(self.checksum_value(&serde_json::to_value(entity)?))
    }

    pub fn checksum_value(&self, value: &Value) -> String {
        hex_sha256(&canonical_bytes(value))
    }

    /// False on mismatch or if the entity cannot be serialized.
    pub fn verify<T: Serialize>(&self, entity: &T, expected: &str) -> bool {
        self.checksum(entity).is_ok_and(|actual| actual == expected)
    }

    pub fn validate_or_throw<T: Serialize>(&self, entity: &T, expected: &str) -> Result<()> {
        if !is_checksum_format(expected) {
            return Err(MemoryError::Corruption(format!(
                "invalid checksum format (expected 64 hex characters, got {} chars)",
                expected.len()
            )));
        }
        if self.checksum(entity)? != expected {
            return Err(MemoryError::Corruption("checksum mismatch".into()));
        }
        Ok(())
    }

    /// A fresh record for `entity`, stamped with this checker's schema version.
    pub fn record_for<T: Serialize>(&self, entity: &T) -> Result<IntegrityRecord> {
        Ok(IntegrityRecord::new(self.checksum(entity)?, self.schema_version.clone()))
    }
}

pub fn is_checksum_format(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

pub(crate) fn hex_sha256(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Canonical bytes of `value` with any `metadata.integrity` removed.
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    write_canonical(value, &mut out, true);
    out
}

fn write_canonical(value: &Value, out: &mut Vec<u8>, top_level: bool) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            let mut first = true;
            for key in keys {
                let Some(v) = map.get(key) else { continue };
                if !first {
                    out.push(b',');
                }
                first = false;
                write_string(key, out);
                out.push(b':');
                if top_level && key == "metadata" {
                    write_metadata(v, out);
                } else {
                    write_canonical(v, out, false);
                }
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out, false);
            }
            out.push(b']');
        }
        Value::String(s) => write_string(s, out),
        Value::Number(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::Bool(b) => out.extend_from_slice(if *b { b"true" } else { b"false" }),
        Value::Null => out.extend_from_slice(b"null"),
    }
}

fn write_metadata(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Object(map) if map.contains_key("integrity") => {
            let mut stripped = map.clone();
            let _ = stripped.remove("integrity");
            write_canonical(&Value::Object(stripped), out, false);
        }
        other => write_canonical(other, out, false),
    }
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    // serde_json string escaping is deterministic; serializing a &str cannot fail.
    match serde_json::to_string(s) {
        Ok(escaped) => out.extend_from_slice(escaped.as_bytes()),
        Err(_) => out.extend_from_slice(format!("{s:?}").as_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::models::{Conversation, Entity, Message};
    use serde_json::json;

    fn checker() -> IntegrityChecker {
        IntegrityChecker::default()
    }

    #[test]
    fn checksum_is_stable_and_hex() {
        let entity = Entity::from(Conversation::new("u1").with_messages(vec![Message::user("hi")]));
        let a = checker().checksum(&entity).unwrap();
        let b = checker().checksum(&entity).unwrap();
        assert_eq!(a, b);
        assert!(is_checksum_format(&a));
        assert!(checker().verify(&entity, &a));
    }

    #[test]
    fn field_order_does_not_matter() {
        let a = json!({"id": "c1", "user_id": "u1", "tags": ["x"], "n": 1.5});
        let b = json!({"n": 1.5, "tags": ["x"], "user_id": "u1", "id": "c1"});
        assert_eq!(checker().checksum_value(&a), checker().checksum_value(&b));
    }

    #[test]
    fn changing_any_field_changes_checksum() {
        let base = json!({"id": "c1", "content": "hello", "nested": {"n": 1, "flag": true}});
        let original = checker().checksum_value(&base);
        let variants = [
            json!({"id": "c2", "content": "hello", "nested": {"n": 1, "flag": true}}),
            json!({"id": "c1", "content": "hellO", "nested": {"n": 1, "flag": true}}),
            json!({"id": "c1", "content": "hello", "nested": {"n": 2, "flag": true}}),
            json!({"id": "c1", "content": "hello", "nested": {"n": 1, "flag": false}}),
            json!({"id": "c1", "content": "hello", "nested": {"n": 1, "flag": true, "x": null}}),
        ];
        for v in &variants {
            assert_ne!(checker().checksum_value(v), original, "{v}");
        }
    }

    #[test]
    fn integrity_record_is_excluded() {
        let mut entity = Entity::from(Conversation::new("u1"));
        let before = checker().checksum(&entity).unwrap();
        entity.set_integrity(Some(checker().record_for(&entity).unwrap()));
        let after = checker().checksum(&entity).unwrap();
        assert_eq!(before, after);
        assert_eq!(entity.integrity().unwrap().checksum, before);
    }

    #[test]
    fn nested_integrity_keys_are_not_stripped() {
        let a = json!({"body": {"integrity": "x"}});
        let b = json!({"body": {}});
        assert_ne!(checker().checksum_value(&a), checker().checksum_value(&b));
    }

    #[test]
    fn canonical_form_is_compact_and_sorted() {
        let v = json!({"b": [1, "two"], "a": {"d": null, "c": false}});
        assert_eq!(
            String::from_utf8(canonical_bytes(&v)).unwrap(),
            r#"{"a":{"c":false,"d":null},"b":[1,"two"]}"#
        );
    }

    #[test]
    fn validate_or_throw_rejects_malformed_and_mismatched() {
        let entity = json!({"id": "c1"});
        let good = checker().checksum_value(&entity);
        assert!(checker().validate_or_throw(&entity, &good).is_ok());

        let short = checker().validate_or_throw(&entity, "abc123").unwrap_err();
        assert!(matches!(short, MemoryError::Corruption(ref m) if m.contains("format")));

        let non_hex = "z".repeat(64);
        assert!(checker().validate_or_throw(&entity, &non_hex).is_err());

        let wrong = "0".repeat(64);
        let mismatch = checker().validate_or_throw(&entity, &wrong).unwrap_err();
        assert!(matches!(mismatch, MemoryError::Corruption(ref m) if m.contains("mismatch")));
    }
}
