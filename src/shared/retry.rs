//! Bounded retry with linear backoff.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Linear backoff: attempt `n` (1-based) waits `(n - 1) * base` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoff {
    pub base: Duration,
    pub max_attempts: u32,
}

impl LinearBackoff {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Delay before the given 1-based attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.base * attempt.saturating_sub(1)
    }
}

/// Why a retried operation gave up.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Run `op` until it succeeds or the attempt budget is spent.
///
/// Each attempt is bounded by `attempt_timeout`; a timed out attempt
/// counts as a failure and is reported through `on_timeout`.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: LinearBackoff,
    attempt_timeout: Duration,
    label: &str,
    on_timeout: impl Fn() -> E,
    mut op: F,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut last_error = None;

    for attempt in 1..=policy.max_attempts {
        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            debug!(label = %label, attempt, delay_ms = %delay.as_millis(), "Backing off before retry");
            tokio::time::sleep(delay).await;
        }

        let outcome = match tokio::time::timeout(attempt_timeout, op(attempt)).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout()),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(
                    label = %label,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "Attempt failed"
                );
                last_error = Some(e);
            }
        }
    }

    Err(RetryExhausted {
        attempts: policy.max_attempts,
        // max_attempts is at least 1, so at least one error was recorded
        last_error: last_error.unwrap_or_else(on_timeout),
    })
}
