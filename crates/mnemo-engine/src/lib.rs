//! # mnemo-engine
//!
//! Composition layer: the [`ResilientOrchestrator`] that routes memory
//! operations between the storage-backed primary path and the cache-only
//! [`FallbackContext`], plus the [`AppContext`] that wires everything up.

#![deny(unsafe_code)]

pub mod app;
pub mod fallback;
pub mod health;
pub mod orchestrator;
pub mod primary;

pub use app::{AppContext, MaintenanceReport};
pub use fallback::{FallbackCacheStats, FallbackConfig, FallbackContext};
pub use health::{Capability, HealthStatus};
pub use orchestrator::{HealthReport, OperationCounts, ResilientOrchestrator, ServiceMetrics, StoreOutcome};
pub use primary::StoragePrimaryService;
