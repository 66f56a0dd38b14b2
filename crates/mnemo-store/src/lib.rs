//! # mnemo-store
//!
//! Concrete [`StorageBackend`](mnemo_core::StorageBackend) implementations:
//! SQLite for the binary, an in-memory document store, and a scriptable
//! fault-injecting wrapper for tests.

pub mod database;
pub mod entities;
pub mod error;
pub mod in_memory;
pub mod row_helpers;
pub mod schema;
pub mod scripted;
pub mod sqlite;

pub use database::Database;
pub use entities::EntityRepo;
pub use error::StoreError;
pub use in_memory::InMemoryBackend;
pub use scripted::{BackendOp, ScriptedBackend};
pub use sqlite::SqliteBackend;
