use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use mnemo_core::errors::{MemoryError, Result};

use crate::breaker::{Admission, BreakerRegistry, CircuitBreaker};
use crate::policy::RetryPolicy;

/// Releases a HALF_OPEN probe slot if the attempt ends without an outcome
/// (future dropped or cancelled).
struct ProbeGuard<'a> {
    breaker: Option<&'a CircuitBreaker>,
}

impl<'a> ProbeGuard<'a> {
    fn new(breaker: Option<&'a CircuitBreaker>, admission: Admission) -> Self {
        Self {
            breaker: breaker.filter(|_| admission == Admission::Probe),
        }
    }

    fn disarm(&mut self) {
        self.breaker = None;
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if let Some(b) = self.breaker {
            b.release_probe();
        }
    }
}

/// Runs operations under a [`RetryPolicy`], consulting the breaker for
/// `breaker_key` before every attempt.
pub struct RetryExecutor {
    breakers: Arc<BreakerRegistry>,
    total_retries: AtomicU64,
}

impl RetryExecutor {
    pub fn new(breakers: Arc<BreakerRegistry>) -> Self {
        Self {
            breakers,
            total_retries: AtomicU64::new(0),
        }
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    pub async fn execute<T, F, Fut>(&self, policy: &RetryPolicy, breaker_key: Option<&str>, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(policy, breaker_key, op, None).await
    }

    /// Like [`execute`](Self::execute), but gives up with
    /// [`MemoryError::Cancelled`] as soon as `cancel` fires. Cancellation is
    /// never recorded as a failure.
    pub async fn execute_cancellable<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        breaker_key: Option<&str>,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(policy, breaker_key, op, Some(cancel)).await
    }

    async fn run<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        breaker_key: Option<&str>,
        mut op: F,
        cancel: Option<&CancellationToken>,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let breaker = breaker_key.map(|k| self.breakers.get(k));
        let max_attempts = policy.max_attempts();
        let mut last_error: Option<MemoryError> = None;

        for attempt in 0..max_attempts {
            if cancel.is_some_and(|t| t.is_cancelled()) {
                return Err(MemoryError::Cancelled);
            }

            let admission = breaker.as_deref().map_or(Admission::Allowed, CircuitBreaker::admit);
            if admission == Admission::Denied {
                let key = breaker_key.unwrap_or_default();
                debug!(key, attempt, "breaker open, short-circuiting");
                return Err(MemoryError::CircuitOpen { key: key.to_string() });
            }
            let mut guard = ProbeGuard::new(breaker.as_deref(), admission);

            let outcome = match cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(MemoryError::Cancelled),
                    r = op() => r,
                },
                None => op().await,
            };
            guard.disarm();

            match outcome {
                Ok(value) => {
                    if let Some(b) = &breaker {
                        b.record_success();
                    }
                    return Ok(value);
                }
                Err(e) => {
                    if let Some(b) = &breaker {
                        b.record_failure();
                    }
                    if !policy.is_retryable(&e) {
                        debug!(kind = %e.kind(), error = %e, "non-retryable error, giving up");
                        return Err(e);
                    }
                    if attempt + 1 >= max_attempts {
                        warn!(
                            key = breaker_key.unwrap_or("-"),
                            attempts = max_attempts,
                            error = %e,
                            "retries exhausted"
                        );
                        return Err(e);
                    }

                    let delay = policy.delay(attempt);
                    self.total_retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        key = breaker_key.unwrap_or("-"),
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after error"
                    );
                    last_error = Some(e);

                    match cancel {
                        Some(token) => tokio::select! {
                            biased;
                            _ = token.cancelled() => return Err(MemoryError::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        },
                        None => tokio::time::sleep(delay).await,
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| MemoryError::TransientIo("retry budget exhausted".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use parking_lot::Mutex;

    use crate::breaker::{BreakerConfig, CircuitState};

    fn executor(threshold: u32) -> RetryExecutor {
        RetryExecutor::new(Arc::new(BreakerRegistry::new(BreakerConfig {
            threshold,
            recovery_timeout: Duration::from_secs(60),
        })))
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(10), Duration::from_millis(100), 2.0, 0.1).unwrap()
    }

    #[tokio::test]
    async fn success_on_first_try() {
        let exec = executor(5);
        let calls = &AtomicUsize::new(0);
        let result = exec
            .execute(&fast_policy(3), Some("storage"), || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, MemoryError>(42)
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(exec.total_retries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_then_success_keeps_breaker_closed() {
        let exec = executor(5);
        let calls = &AtomicUsize::new(0);
        let result = exec
            .execute(&fast_policy(3), Some("storage"), || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(MemoryError::TransientIo("connection reset".into()))
                } else {
                    Ok("stored")
                }
            })
            .await;
        assert_eq!(result.unwrap(), "stored");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let status = exec.breakers().status("storage");
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failure_count, 0);
    }

    #[tokio::test]
    async fn non_retryable_error_invokes_once() {
        let exec = executor(5);
        let calls = &AtomicUsize::new(0);
        let result: Result<()> = exec
            .execute(&fast_policy(5), Some("storage"), || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(MemoryError::Validation("missing id".into()))
            })
            .await;
        assert!(matches!(result, Err(MemoryError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(exec.breakers().status("storage").failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_transient_error_uses_every_attempt() {
        let exec = executor(100);
        let calls = &AtomicUsize::new(0);
        let result: Result<()> = exec
            .execute(&fast_policy(4), Some("search"), || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(MemoryError::TransientIo("timeout".into()))
            })
            .await;
        assert!(matches!(result, Err(MemoryError::TransientIo(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(exec.total_retries(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_delays_stay_within_jitter_band() {
        let exec = executor(100);
        let policy = fast_policy(5);
        let stamps = &Mutex::new(Vec::new());
        let _: Result<()> = exec
            .execute(&policy, None, || async move {
                stamps.lock().push(tokio::time::Instant::now());
                Err(MemoryError::TransientIo("down".into()))
            })
            .await;
        let stamps = stamps.lock().clone();
        assert_eq!(stamps.len(), 5);
        for (i, pair) in stamps.windows(2).enumerate() {
            let waited = (pair[1] - pair[0]).as_secs_f64();
            let d = policy.nominal_delay(i as u32).as_secs_f64();
            let slack = 0.002;
            assert!(
                waited >= d * 0.9 - slack && waited <= d * 1.1 + slack,
                "attempt {i}: waited {waited}, nominal {d}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_short_circuits_without_invoking() {
        let exec = executor(5);
        let calls = &AtomicUsize::new(0);
        let policy = fast_policy(1);
        for _ in 0..5 {
            let _: Result<()> = exec
                .execute(&policy, Some("storage"), || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(MemoryError::TransientIo("refused".into()))
                })
                .await;
        }
        assert_eq!(exec.breakers().status("storage").state, CircuitState::Open);

        let result: Result<()> = exec
            .execute(&policy, Some("storage"), || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        let err = result.unwrap_err();
        assert!(matches!(err, MemoryError::CircuitOpen { ref key } if key == "storage"));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_checked_between_attempts() {
        let exec = executor(2);
        let calls = &AtomicUsize::new(0);
        let result: Result<()> = exec
            .execute(&fast_policy(5), Some("context"), || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(MemoryError::TransientIo("flaky".into()))
            })
            .await;
        assert!(matches!(result, Err(MemoryError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_records_nothing_more() {
        let exec = Arc::new(executor(100));
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let task = {
            let exec = exec.clone();
            let token = token.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                let policy = RetryPolicy::new(5, Duration::from_secs(10), Duration::from_secs(10), 2.0, 0.0)
                    .unwrap();
                exec.execute_cancellable(&policy, Some("storage"), &token, || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(MemoryError::TransientIo("down".into()))
                    }
                })
                .await
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
        let result = task.await.unwrap();
        assert!(matches!(result, Err(MemoryError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(exec.breakers().status("storage").failure_count, 1);
    }

    #[tokio::test]
    async fn already_cancelled_token_never_invokes() {
        let exec = executor(5);
        let token = CancellationToken::new();
        token.cancel();
        let calls = &AtomicUsize::new(0);
        let result: Result<()> = exec
            .execute_cancellable(&fast_policy(3), Some("storage"), &token, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(MemoryError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_a_single_concurrent_probe() {
        let exec = executor(1);
        exec.breakers().record_failure("storage");
        tokio::time::advance(Duration::from_secs(61)).await;

        let calls = &AtomicUsize::new(0);
        let policy = fast_policy(1);
        let attempts = (0..4).map(|_| {
            exec.execute(&policy, Some("storage"), || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, MemoryError>(())
            })
        });
        let results = futures::future::join_all(attempts).await;

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(MemoryError::CircuitOpen { .. })))
                .count(),
            3
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(exec.breakers().status("storage").state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_probe_releases_slot() {
        let exec = Arc::new(executor(1));
        exec.breakers().record_failure("primary");
        tokio::time::advance(Duration::from_secs(61)).await;

        let token = CancellationToken::new();
        let task = {
            let exec = exec.clone();
            let token = token.clone();
            tokio::spawn(async move {
                exec.execute_cancellable(&fast_policy(1), Some("primary"), &token, || async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<_, MemoryError>(())
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(exec.breakers().status("primary").probe_in_flight);
        token.cancel();
        assert!(matches!(task.await.unwrap(), Err(MemoryError::Cancelled)));

        let status = exec.breakers().status("primary");
        assert_eq!(status.state, CircuitState::HalfOpen);
        assert!(!status.probe_in_flight);
        assert_eq!(status.failure_count, 1);
        assert!(exec.breakers().can_attempt("primary"));
    }
}
