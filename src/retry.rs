//! Retry, reconnect backoff, and timeout utilities.
//!
//! The helpers in this module are transport-agnostic. `RetryPolicy` bounds REST
//! request retries with lightweight jitter; `ReconnectPolicy` bounds how long a
//! realtime socket keeps re-dialing before it gives up.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;

/// Policy controlling retry attempts and exponential backoff behavior.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of attempts including the first attempt.
    pub max_attempts: usize,
    /// Delay used before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for exponential backoff delay growth.
    pub max_backoff: Duration,
    /// Maximum random jitter added to each retry delay.
    pub jitter: Duration,
}

impl RetryPolicy {
    /// Returns the default used for community REST calls.
    pub fn rest() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(1),
            jitter: Duration::from_millis(100),
        }
    }

    /// Computes the delay to apply before the given retry attempt.
    ///
    /// `attempt` is 1-based and should correspond to the current attempt index.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let mut delay = self.initial_backoff;
        for _ in 1..attempt {
            delay = std::cmp::min(delay.saturating_mul(2), self.max_backoff);
        }
        delay + jitter_duration(self.jitter, attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::rest()
    }
}

/// Backoff schedule for re-dialing a dropped realtime socket.
///
/// Delays start at `min_delay`, grow by `growth_factor` per consecutive failure,
/// and never exceed `max_delay`. Once `max_retries` consecutive failures have
/// been seen the socket stops for good and reports a terminal close.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub min_delay: Duration,
    /// Upper bound for the reconnect delay.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub growth_factor: f64,
    /// Consecutive failures tolerated before giving up.
    pub max_retries: usize,
    /// Time allowed for a single connection attempt to complete.
    pub connection_timeout: Duration,
}

impl ReconnectPolicy {
    /// Schedule used by the chat room channel.
    pub fn chat_room() -> Self {
        Self {
            min_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(600),
            growth_factor: 1.3,
            max_retries: 100,
            connection_timeout: Duration::from_secs(10),
        }
    }

    /// Schedule used by private chat and notification channels.
    pub fn user_channel() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            growth_factor: 1.3,
            max_retries: 100,
            connection_timeout: Duration::from_secs(10),
        }
    }

    /// Computes the delay before reconnect attempt `failures` (1-based).
    pub fn delay_for_attempt(&self, failures: usize) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let growth = if self.growth_factor.is_finite() && self.growth_factor >= 1.0 {
            self.growth_factor
        } else {
            1.0
        };
        let exponent = i32::try_from(failures - 1).unwrap_or(i32::MAX);
        let scaled = self.min_delay.as_secs_f64() * growth.powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        if !capped.is_finite() {
            return self.max_delay;
        }
        Duration::from_secs_f64(capped)
    }

    /// Returns true once `failures` consecutive failures exceed the budget.
    pub fn is_exhausted(&self, failures: usize) -> bool {
        failures > self.max_retries
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::user_channel()
    }
}

/// Executes an async operation with retry behavior controlled by `policy`.
///
/// `op` receives the 1-based attempt number and must return a future that
/// resolves to the operation result. `should_retry` determines whether each
/// error is retryable.
pub async fn retry_async<T, E, Op, Fut, ShouldRetry>(
    policy: &RetryPolicy,
    mut op: Op,
    mut should_retry: ShouldRetry,
) -> Result<T, E>
where
    Op: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    ShouldRetry: FnMut(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= max_attempts || !should_retry(&error) {
                    return Err(error);
                }

                let delay = policy.delay_for_attempt(attempt);
                debug!(
                    event = "retry_attempt_failed",
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    unreachable!("max_attempts is always at least 1")
}

/// Applies a timeout to an async computation.
pub async fn with_timeout<T, Fut>(
    timeout: Duration,
    future: Fut,
) -> Result<T, tokio::time::error::Elapsed>
where
    Fut: Future<Output = T>,
{
    tokio::time::timeout(timeout, future).await
}

fn jitter_duration(max_jitter: Duration, attempt: usize) -> Duration {
    if max_jitter.is_zero() {
        return Duration::ZERO;
    }

    let limit_nanos = max_jitter.as_nanos().min(u64::MAX as u128) as u64;
    if limit_nanos == 0 {
        return Duration::ZERO;
    }

    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    let mixed = now_nanos ^ ((attempt as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    Duration::from_nanos(mixed % (limit_nanos + 1))
}
