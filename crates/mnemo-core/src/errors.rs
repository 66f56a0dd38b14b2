use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse classification of a [`MemoryError`], used by retry policies and
/// health tracking.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientIo,
    Validation,
    Corruption,
    CircuitOpen,
    BackupIntegrity,
    NotFound,
    Unavailable,
    Cancelled,
    Serialization,
    PartialDelete,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TransientIo => "transient_io",
            Self::Validation => "validation",
            Self::Corruption => "corruption",
            Self::CircuitOpen => "circuit_open",
            Self::BackupIntegrity => "backup_integrity",
            Self::NotFound => "not_found",
            Self::Unavailable => "unavailable",
            Self::Cancelled => "cancelled",
            Self::Serialization => "serialization",
            Self::PartialDelete => "partial_delete",
        };
        f.write_str(s)
    }
}

/// Typed error hierarchy for memory operations.
/// Only transient I/O failures are retried; every other kind is a decision point.
#[derive(Clone, Debug, thiserror::Error)]
pub enum MemoryError {
    // Retryable
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    // Fatal for the current call
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("data corruption detected: {0}")]
    Corruption(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serialization(String),

    // Operational
    #[error("circuit breaker '{key}' is open; no attempt was made")]
    CircuitOpen { key: String },
    #[error("backup {backup_id} failed its integrity check")]
    BackupIntegrity { backup_id: String },
    #[error("{operation} unavailable: {reason}; no changes were applied")]
    Unavailable { operation: String, reason: String },
    #[error("operation cancelled")]
    Cancelled,
    /// A multi-entity delete failed midway and could not be rolled back.
    #[error(
        "delete incomplete: removed [{}], still present [{}]; originals are in critical backup {backup_id}",
        .removed.join(", "),
        .remaining.join(", ")
    )]
    PartialDelete {
        backup_id: String,
        removed: Vec<String>,
        remaining: Vec<String>,
    },
}

impl MemoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TransientIo(_) => ErrorKind::TransientIo,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Corruption(_) => ErrorKind::Corruption,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::BackupIntegrity { .. } => ErrorKind::BackupIntegrity,
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::PartialDelete { .. } => ErrorKind::PartialDelete,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientIo
    }

    /// True when the error was produced without the underlying operation
    /// ever running (breaker short-circuit or cancellation).
    pub fn is_short_circuit(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. } | Self::Cancelled)
    }

    pub fn unavailable(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(e: serde_json::Error) -> Self {
        MemoryError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
