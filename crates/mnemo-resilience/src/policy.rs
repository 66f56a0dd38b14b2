use std::collections::BTreeSet;
use std::time::Duration;

use rand::Rng;

use mnemo_core::errors::{ErrorKind, MemoryError, Result};
use mnemo_settings::RetrySettings;

/// Backoff parameters for one class of operations. Immutable once built:
/// the builder-style methods consume the policy and return a new one.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
    jitter_fraction: f64,
    retryable_kinds: BTreeSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter_fraction: 0.1,
            retryable_kinds: BTreeSet::from([ErrorKind::TransientIo]),
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
        jitter_fraction: f64,
    ) -> Result<Self> {
        if max_attempts == 0 {
            return Err(MemoryError::Validation("max_attempts must be > 0".into()));
        }
        if !(backoff_factor > 1.0) {
            return Err(MemoryError::Validation("backoff_factor must be > 1".into()));
        }
        if !(0.0..=1.0).contains(&jitter_fraction) {
            return Err(MemoryError::Validation("jitter_fraction must be within [0, 1]".into()));
        }
        if base_delay > max_delay {
            return Err(MemoryError::Validation("base_delay exceeds max_delay".into()));
        }
        Ok(Self {
            max_attempts,
            base_delay,
            max_delay,
            backoff_factor,
            jitter_fraction,
            retryable_kinds: BTreeSet::from([ErrorKind::TransientIo]),
        })
    }

    pub fn from_settings(settings: &RetrySettings) -> Result<Self> {
        Self::new(
            settings.max_attempts,
            Duration::from_millis(settings.base_delay_ms),
            Duration::from_millis(settings.max_delay_ms),
            settings.backoff_factor,
            settings.jitter_fraction,
        )
    }

    /// Replace the set of error kinds that trigger another attempt.
    pub fn with_retryable_kinds(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable_kinds = kinds.into_iter().collect();
        self
    }

    /// Same delays, different attempt budget. Zero is clamped to one.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    pub fn jitter_fraction(&self) -> f64 {
        self.jitter_fraction
    }

    pub fn retryable_kinds(&self) -> &BTreeSet<ErrorKind> {
        &self.retryable_kinds
    }

    pub fn is_retryable(&self, error: &MemoryError) -> bool {
        self.retryable_kinds.contains(&error.kind())
    }

    /// `min(base * factor^attempt, max)` before jitter.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exp_ns = self.base_delay.as_nanos() as f64 * self.backoff_factor.powi(attempt as i32);
        let capped_ns = exp_ns.min(self.max_delay.as_nanos() as f64);
        Duration::from_nanos(capped_ns.max(0.0).round() as u64)
    }

    /// Delay with jitter applied, `random` in `[0, 1]` mapping onto `[-jitter, +jitter]`.
    pub fn delay_with_random(&self, attempt: u32, random: f64) -> Duration {
        let nominal_ns = self.nominal_delay(attempt).as_nanos() as f64;
        let spread = nominal_ns * self.jitter_fraction;
        let offset = spread * (2.0 * random.clamp(0.0, 1.0) - 1.0);
        Duration::from_nanos((nominal_ns + offset).max(0.0).round() as u64)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let random: f64 = rand::thread_rng().gen();
        self.delay_with_random(attempt, random)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(1000), 2.0, 0.1).unwrap()
    }

    #[test]
    fn defaults_retry_only_transient_io() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts(), 3);
        assert!(p.is_retryable(&MemoryError::TransientIo("reset".into())));
        assert!(!p.is_retryable(&MemoryError::Validation("bad".into())));
        assert!(!p.is_retryable(&MemoryError::Corruption("bad".into())));
    }

    #[test]
    fn new_rejects_invalid_parameters() {
        let d = Duration::from_millis(10);
        assert!(RetryPolicy::new(0, d, d, 2.0, 0.1).is_err());
        assert!(RetryPolicy::new(3, d, d, 1.0, 0.1).is_err());
        assert!(RetryPolicy::new(3, d, d, 2.0, 1.5).is_err());
        assert!(RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(1), 2.0, 0.1).is_err());
        assert!(RetryPolicy::new(3, d, d, f64::NAN, 0.1).is_err());
    }

    #[test]
    fn nominal_delay_grows_then_caps() {
        let p = policy();
        assert_eq!(p.nominal_delay(0), Duration::from_millis(100));
        assert_eq!(p.nominal_delay(1), Duration::from_millis(200));
        assert_eq!(p.nominal_delay(3), Duration::from_millis(800));
        assert_eq!(p.nominal_delay(4), Duration::from_millis(1000));
        assert_eq!(p.nominal_delay(20), Duration::from_millis(1000));
    }

    #[test]
    fn jitter_stays_within_band() {
        let p = policy();
        for attempt in 0..6 {
            let d = p.nominal_delay(attempt).as_secs_f64();
            let low = p.delay_with_random(attempt, 0.0).as_secs_f64();
            let high = p.delay_with_random(attempt, 1.0).as_secs_f64();
            assert!((low - d * 0.9).abs() < 1e-9, "attempt {attempt}: {low}");
            assert!((high - d * 1.1).abs() < 1e-9, "attempt {attempt}: {high}");
            let sampled = p.delay(attempt).as_secs_f64();
            assert!(sampled >= d * 0.9 - 1e-9 && sampled <= d * 1.1 + 1e-9);
        }
    }

    #[test]
    fn midpoint_random_is_nominal() {
        let p = policy();
        assert_eq!(p.delay_with_random(2, 0.5), p.nominal_delay(2));
    }

    #[test]
    fn retryable_kinds_can_be_replaced() {
        let p = RetryPolicy::default().with_retryable_kinds([ErrorKind::TransientIo, ErrorKind::Corruption]);
        assert!(p.is_retryable(&MemoryError::Corruption("x".into())));
        assert_eq!(p.retryable_kinds().len(), 2);
    }

    #[test]
    fn from_settings_uses_configured_values() {
        let settings = RetrySettings {
            max_attempts: 4,
            base_delay_ms: 50,
            max_delay_ms: 500,
            backoff_factor: 3.0,
            jitter_fraction: 0.0,
        };
        let p = RetryPolicy::from_settings(&settings).unwrap();
        assert_eq!(p.max_attempts(), 4);
        assert_eq!(p.delay(1), Duration::from_millis(150));
    }
}
