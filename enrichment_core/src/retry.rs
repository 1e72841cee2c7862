//! Exponential backoff with jitter around fallible remote calls.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// How a failed attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// The remote could not be reached; retried while attempts remain.
    Connection,
    /// The remote answered but asked us to come back later; retried.
    Transient,
    /// Retrying cannot help; returned immediately.
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// No sleeping between attempts (tests, dry runs).
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    /// Delay before the attempt following `failures` failed ones: `base * 2^(failures-1) + jitter`,
    /// capped at `max_delay`.
    pub fn delay_after(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(20);
        let backoff = self.base_delay.saturating_mul(1u32 << exp);
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        backoff.saturating_add(jitter).min(self.max_delay)
    }
}

/// The error that ended a retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure<E> {
    pub error: E,
    pub attempts: u32,
    pub class: RetryClass,
}

impl<E> RetryFailure<E> {
    /// True when every allowed attempt was spent on retryable errors.
    pub fn exhausted(&self) -> bool {
        self.class != RetryClass::Permanent
    }
}

/// Run `op` until it succeeds, fails permanently, or `policy.max_attempts` is spent.
///
/// `op` receives the 1-based attempt number. The only suspension points are the
/// call itself and the backoff sleep.
pub async fn retry_with_backoff<T, E, Op, Fut, C>(
    policy: &RetryPolicy,
    classify: C,
    mut op: Op,
) -> Result<T, RetryFailure<E>>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryClass,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let err = match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };

        let class = classify(&err);
        match class {
            RetryClass::Permanent => {
                return Err(RetryFailure {
                    error: err,
                    attempts: attempt,
                    class,
                });
            }
            RetryClass::Connection => {
                tracing::warn!(attempt, max_attempts, error = %err, "connection failure");
            }
            RetryClass::Transient => {
                tracing::debug!(attempt, max_attempts, error = %err, "transient failure");
            }
        }

        if attempt >= max_attempts {
            return Err(RetryFailure {
                error: err,
                attempts: attempt,
                class,
            });
        }

        let delay = policy.delay_after(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
