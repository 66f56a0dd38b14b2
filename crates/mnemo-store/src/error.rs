use mnemo_core::MemoryError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        table: &'static str,
        column: &'static str,
        detail: String,
    },
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Database and filesystem failures are treated as transient; anything that
/// means the stored bytes are wrong is corruption.
impl From<StoreError> for MemoryError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Database(msg) | StoreError::Io(msg) => MemoryError::TransientIo(msg),
            StoreError::NotFound(msg) => MemoryError::NotFound(msg),
            StoreError::Serialization(msg) => MemoryError::Serialization(msg),
            e @ StoreError::CorruptRow { .. } => MemoryError::Corruption(e.to_string()),
        }
    }
}
