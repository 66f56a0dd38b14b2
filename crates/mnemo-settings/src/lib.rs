//! # mnemo-settings
//!
//! Layered configuration for the memory layer.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`MnemoSettings::default()`]
//! 2. **User file**: `~/.mnemo/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `MNEMO_*` overrides (highest priority)
//!
//! There is no global instance. The binary loads settings once and hands
//! them to the application context.
//!
//! ```no_run
//! let settings = mnemo_settings::load_settings().unwrap_or_default();
//! println!("retry attempts: {}", settings.retry.max_attempts);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path, validate};
pub use types::*;
