//! # mnemo-integrity
//!
//! Data-integrity layer for persisted memory entities.
//!
//! - [`IntegrityChecker`]: canonical serialization and SHA-256 checksums
//! - [`CorruptionDetector`]: null-byte, encoding and truncation signatures
//! - [`RecoveryEngine`]: generic cleaning and typed reconstruction
//! - [`QuarantineStore`] / [`BackupStore`]: side stores for bad and saved data
//! - [`IntegrityAwareStorage`]: a `StorageBackend` decorator tying it together

#![deny(unsafe_code)]

pub mod backup;
pub mod checksum;
pub mod corruption;
pub mod quarantine;
pub mod recovery;
pub mod storage;
pub mod validation;

pub use backup::{BackupEntry, BackupKind, BackupStore, BackupValidation};
pub use checksum::{canonical_bytes, is_checksum_format, IntegrityChecker};
pub use corruption::{CorruptionDetector, CorruptionPattern};
pub use quarantine::{CorruptionEvent, CorruptionReport, QuarantineEntry, QuarantineStats, QuarantineStore};
pub use recovery::{RecoveryEngine, CONTENT_SENTINEL, SUMMARY_SENTINEL};
pub use storage::{CleanupReport, IntegrityAwareStorage, IntegrityHealth, IntegrityOptions};
pub use validation::{DefaultValidator, EntityValidator, ValidationReport};
