use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use mnemo_settings::BreakerSettings;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BreakerConfig {
    pub threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

/// Outcome of asking a breaker for permission to run one attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Denied,
    /// Normal traffic while CLOSED.
    Allowed,
    /// The single HALF_OPEN trial slot. Must end in a record or a release.
    Probe,
}

/// Point-in-time copy of a breaker.
#[derive(Clone, Debug, Serialize)]
pub struct BreakerStatus {
    pub key: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub threshold: u32,
    pub recovery_timeout_ms: u64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub probe_in_flight: bool,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    probe_in_flight: bool,
}

/// Per-key failure-counting state machine.
///
/// CLOSED -> OPEN once `failure_count >= threshold`; OPEN -> HALF_OPEN lazily
/// inside [`admit`](Self::admit) once the recovery timeout has elapsed;
/// HALF_OPEN -> CLOSED on success or back to OPEN on failure. At most one
/// HALF_OPEN probe is in flight at a time.
#[derive(Debug)]
pub struct CircuitBreaker {
    key: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(key: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            key: key.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                last_failure_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    pub fn admit(&self) -> Admission {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let cooled = inner
                    .last_failure
                    .map_or(true, |t| t.elapsed() > self.config.recovery_timeout);
                if cooled {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!(key = %self.key, "circuit breaker half-open, admitting probe");
                    Admission::Probe
                } else {
                    Admission::Denied
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    debug!(key = %self.key, "probe already in flight, denying");
                    Admission::Denied
                } else {
                    inner.probe_in_flight = true;
                    Admission::Probe
                }
            }
        }
    }

    pub fn can_attempt(&self) -> bool {
        self.admit() != Admission::Denied
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            info!(key = %self.key, "circuit breaker closed after successful attempt");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.probe_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());
        inner.probe_in_flight = false;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                warn!(key = %self.key, "probe failed, circuit breaker re-opened");
            }
            CircuitState::Closed if inner.failure_count >= self.config.threshold => {
                inner.state = CircuitState::Open;
                warn!(
                    key = %self.key,
                    failures = inner.failure_count,
                    cooldown_ms = self.config.recovery_timeout.as_millis() as u64,
                    "circuit breaker opened"
                );
            }
            _ => {}
        }
    }

    /// Give back a probe slot without recording an outcome (cancelled attempt).
    pub fn release_probe(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && inner.probe_in_flight {
            inner.probe_in_flight = false;
            debug!(key = %self.key, "probe released without outcome");
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.last_failure_at = None;
        inner.probe_in_flight = false;
        info!(key = %self.key, "circuit breaker reset");
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn status(&self) -> BreakerStatus {
        let inner = self.inner.lock();
        BreakerStatus {
            key: self.key.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            threshold: self.config.threshold,
            recovery_timeout_ms: self.config.recovery_timeout.as_millis() as u64,
            last_failure_time: inner.last_failure_at,
            probe_in_flight: inner.probe_in_flight,
        }
    }
}

/// Lazily created breakers, one per key, living for the process lifetime.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    configs: HashMap<String, BreakerConfig>,
    default_config: BreakerConfig,
}

impl BreakerRegistry {
    pub fn new(default_config: BreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            configs: HashMap::new(),
            default_config,
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, config: BreakerConfig) -> Self {
        let _ = self.configs.insert(key.into(), config);
        self
    }

    pub fn from_settings(settings: &BreakerSettings) -> Self {
        settings
            .entries()
            .into_iter()
            .fold(Self::new(BreakerConfig::default()), |registry, (key, t)| {
                registry.with_config(
                    key,
                    BreakerConfig {
                        threshold: t.failure_threshold,
                        recovery_timeout: Duration::from_millis(t.recovery_timeout_ms),
                    },
                )
            })
    }

    pub fn get(&self, key: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(key) {
            return existing.clone();
        }
        let config = self.configs.get(key).copied().unwrap_or(self.default_config);
        self.breakers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(key, config)))
            .clone()
    }

    pub fn can_attempt(&self, key: &str) -> bool {
        self.get(key).can_attempt()
    }

    pub fn record_success(&self, key: &str) {
        self.get(key).record_success();
    }

    pub fn record_failure(&self, key: &str) {
        self.get(key).record_failure();
    }

    pub fn status(&self, key: &str) -> BreakerStatus {
        self.get(key).status()
    }

    /// Returns false when no breaker exists for `key` yet.
    pub fn reset(&self, key: &str) -> bool {
        match self.breakers.get(key) {
            Some(b) => {
                b.reset();
                true
            }
            None => false,
        }
    }

    pub fn statuses(&self) -> Vec<BreakerStatus> {
        let mut all: Vec<BreakerStatus> = self.breakers.iter().map(|b| b.status()).collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "storage",
            BreakerConfig {
                threshold,
                recovery_timeout: Duration::from_millis(timeout_ms),
            },
        )
    }

    #[test]
    fn exactly_threshold_failures_open() {
        let b = breaker(3, 1000);
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.can_attempt());
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.status().failure_count, 3);
    }

    #[test]
    fn success_resets_failure_count() {
        let b = breaker(3, 1000);
        b.record_failure();
        b.record_failure();
        b.record_success();
        assert_eq!(b.status().failure_count, 0);
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn open_denies_until_timeout() {
        let b = breaker(1, 1000);
        b.record_failure();
        for _ in 0..5 {
            assert!(!b.can_attempt());
        }
        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(!b.can_attempt(), "timeout must be strictly exceeded");
        assert_eq!(b.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(b.can_attempt());
        assert_eq!(b.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_success_closes() {
        let b = breaker(2, 100);
        b.record_failure();
        b.record_failure();
        tokio::time::advance(Duration::from_millis(101)).await;
        assert_eq!(b.admit(), Admission::Probe);
        b.record_success();
        let status = b.status();
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens_and_resets_timer() {
        let b = breaker(2, 100);
        b.record_failure();
        b.record_failure();
        let first_failure = b.status().last_failure_time;
        tokio::time::advance(Duration::from_millis(101)).await;
        assert!(b.can_attempt());
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
        assert!(b.status().last_failure_time >= first_failure);
        // The cooldown starts over from the probe failure.
        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(!b.can_attempt());
        tokio::time::advance(Duration::from_millis(51)).await;
        assert!(b.can_attempt());
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_probe_in_flight() {
        let b = breaker(1, 10);
        b.record_failure();
        tokio::time::advance(Duration::from_millis(11)).await;
        assert_eq!(b.admit(), Admission::Probe);
        assert_eq!(b.admit(), Admission::Denied);
        assert_eq!(b.admit(), Admission::Denied);
        b.release_probe();
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert_eq!(b.admit(), Admission::Probe);
    }

    #[test]
    fn registry_creates_lazily_with_per_key_config() {
        let registry = BreakerRegistry::from_settings(&BreakerSettings::default());
        assert!(registry.statuses().is_empty());
        assert_eq!(registry.status("primary").threshold, 2);
        assert_eq!(registry.status("search").recovery_timeout_ms, 45_000);
        assert_eq!(registry.status("unknown").threshold, 5);
        assert_eq!(registry.statuses().len(), 3);
    }

    #[test]
    fn registry_returns_same_breaker_per_key() {
        let registry = BreakerRegistry::default();
        let a = registry.get("context");
        let b = registry.get("context");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn registry_reset() {
        let registry = BreakerRegistry::new(BreakerConfig {
            threshold: 1,
            recovery_timeout: Duration::from_secs(60),
        });
        assert!(!registry.reset("storage"));
        registry.record_failure("storage");
        assert!(!registry.can_attempt("storage"));
        assert!(registry.reset("storage"));
        assert!(registry.can_attempt("storage"));
    }

    #[test]
    fn concurrent_failures_are_not_lost() {
        let b = Arc::new(breaker(1000, 1000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let b = b.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        b.record_failure();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(b.status().failure_count, 800);
        assert_eq!(b.state(), CircuitState::Open);
    }
}
