//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` on the wire and
//! `#[serde(default)]`, so partial JSON fills the gaps from [`Default`].

mod resilience;
mod storage;

pub use resilience::*;
pub use storage::*;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "retry": { "maxAttempts": 5 },
///   "integrity": { "tolerant": true }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MnemoSettings {
    pub retry: RetrySettings,
    pub breakers: BreakerSettings,
    pub integrity: IntegritySettings,
    pub fallback: FallbackSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter level (`RUST_LOG` still wins).
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
