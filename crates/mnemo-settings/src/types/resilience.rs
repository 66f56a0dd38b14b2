use serde::{Deserialize, Serialize};

/// Backoff parameters shared by every retried operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    /// Fraction of the computed delay used as the ± jitter band.
    pub jitter_fraction: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerThreshold {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
}

impl BreakerThreshold {
    pub const fn new(failure_threshold: u32, recovery_timeout_ms: u64) -> Self {
        Self {
            failure_threshold,
            recovery_timeout_ms,
        }
    }
}

/// One breaker per capability so a failing capability degrades alone.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BreakerSettings {
    pub primary: BreakerThreshold,
    pub storage: BreakerThreshold,
    pub context: BreakerThreshold,
    pub search: BreakerThreshold,
    pub preferences: BreakerThreshold,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            primary: BreakerThreshold::new(2, 120_000),
            storage: BreakerThreshold::new(5, 60_000),
            context: BreakerThreshold::new(3, 30_000),
            search: BreakerThreshold::new(5, 45_000),
            preferences: BreakerThreshold::new(3, 30_000),
        }
    }
}

impl BreakerSettings {
    /// `(key, threshold)` pairs in a stable order.
    pub fn entries(&self) -> [(&'static str, BreakerThreshold); 5] {
        [
            ("primary", self.primary),
            ("storage", self.storage),
            ("context", self.context),
            ("search", self.search),
            ("preferences", self.preferences),
        ]
    }
}
