//! Bounded exponential backoff around remote calls
//!
//! Every provider call and every mount attempt goes through [`Retrier::call`].
//! A classifier decides per error whether another attempt is worthwhile; the
//! policy bounds both the attempt count and the total time spent.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::warn;

/// How the retry loop should treat an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Propagate immediately
    Terminal,
    /// Retry after the policy's backoff
    Transient,
    /// Retry, waiting at least this long
    RetryAfter(Duration),
}

/// Backoff parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Upper bound on time spent across all attempts and sleeps
    pub max_elapsed_ms: u64,
    /// Fraction of each delay randomized in both directions (0.0 disables)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            max_elapsed_ms: 120_000,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Undithered delay before attempt `attempt + 1`
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let ms = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exp);
        let capped = ms.min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    fn jittered(&self, base: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return base;
        }
        let spread = self.jitter.min(1.0);
        let factor = 1.0 + rand::rng().random_range(-spread..=spread);
        base.mul_f64(factor.max(0.0))
    }

    pub fn max_elapsed(&self) -> Duration {
        Duration::from_millis(self.max_elapsed_ms)
    }
}

/// Failure of a retried call
#[derive(Error, Debug)]
pub enum RetryError<E> {
    #[error("{error}")]
    Terminal { operation: String, error: E },

    #[error("{operation} gave up after {attempts} attempts: {last}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last: E,
    },
}

impl<E> RetryError<E> {
    /// The underlying error from the last attempt
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Terminal { error, .. } => error,
            RetryError::Exhausted { last, .. } => last,
        }
    }

    pub fn inner(&self) -> &E {
        match self {
            RetryError::Terminal { error, .. } => error,
            RetryError::Exhausted { last, .. } => last,
        }
    }
}

/// Runs operations under a [`RetryPolicy`]
#[derive(Debug, Clone, Default)]
pub struct Retrier {
    policy: RetryPolicy,
}

impl Retrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails terminally, or the budget runs out
    pub async fn call<T, E, F, Fut, C>(
        &self,
        operation: &str,
        classify: C,
        mut op: F,
    ) -> std::result::Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        C: Fn(&E) -> Disposition,
        E: Display,
    {
        let started = Instant::now();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let delay = match classify(&error) {
                Disposition::Terminal => {
                    return Err(RetryError::Terminal {
                        operation: operation.to_string(),
                        error,
                    })
                }
                Disposition::Transient => self.policy.jittered(self.policy.base_delay(attempt)),
                Disposition::RetryAfter(after) => {
                    after.max(self.policy.jittered(self.policy.base_delay(attempt)))
                }
            };

            if attempt >= max_attempts || started.elapsed() + delay > self.policy.max_elapsed() {
                warn!(
                    operation,
                    attempts = attempt,
                    error = %error,
                    "Giving up on transient failure"
                );
                return Err(RetryError::Exhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    last: error,
                });
            }

            warn!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Busy,
        Denied,
        SlowDown(Duration),
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    fn classify(e: &TestError) -> Disposition {
        match e {
            TestError::Busy => Disposition::Transient,
            TestError::Denied => Disposition::Terminal,
            TestError::SlowDown(d) => Disposition::RetryAfter(*d),
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            backoff_multiplier: 2.0,
            max_elapsed_ms: 60_000,
            jitter: 0.0,
        }
    }

    #[test]
    fn test_base_delay_grows_and_caps() {
        let policy = policy();
        assert_eq!(policy.base_delay(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay(3), Duration::from_millis(400));
        assert_eq!(policy.base_delay(10), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_within_spread() {
        let policy = RetryPolicy {
            jitter: 0.5,
            ..policy()
        };
        for _ in 0..100 {
            let d = policy.jittered(Duration::from_millis(1_000));
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1_500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let retrier = Retrier::new(policy());
        let calls = AtomicU32::new(0);

        let result = retrier
            .call("create_share", classify, || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::Busy)
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_propagates_immediately() {
        let retrier = Retrier::new(policy());
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retrier
            .call("delete_share", classify, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Denied)
            })
            .await;

        assert!(matches!(result, Err(RetryError::Terminal { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_max_attempts() {
        let retrier = Retrier::new(policy());
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retrier
            .call("resize_share", classify, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Busy)
            })
            .await;

        match result {
            Err(RetryError::Exhausted { attempts, .. }) => assert_eq!(attempts, 4),
            other => panic!("expected exhaustion, got {:?}", other.err()),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_is_honored() {
        let retrier = Retrier::new(policy());
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        retrier
            .call("list_accounts", classify, || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(TestError::SlowDown(Duration::from_secs(7)))
                } else {
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_budget_stops_early() {
        let retrier = Retrier::new(RetryPolicy {
            max_attempts: 100,
            max_elapsed_ms: 250,
            ..policy()
        });
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retrier
            .call("create_account", classify, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Busy)
            })
            .await;

        assert!(matches!(result, Err(RetryError::Exhausted { .. })));
        // 100ms + 200ms would pass the 250ms budget
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
