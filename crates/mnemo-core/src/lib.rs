pub mod backend;
pub mod errors;
pub mod ids;
pub mod models;
pub mod service;

pub use backend::StorageBackend;
pub use errors::{ErrorKind, MemoryError, Result};
pub use service::PrimaryMemoryService;
