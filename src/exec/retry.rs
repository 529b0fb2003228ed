// src/exec/retry.rs

//! Retry with exponential backoff.
//!
//! The policy is evaluated by [`attempt`], which is generic over the
//! operation and the error type so the same loop serves task execution and
//! cache endpoint failover.

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetryConfig;

/// Errors opt in to being retried.
///
/// Cancellation and configuration errors must return `false`; a task killed
/// during shutdown is not re-run.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Validated retry policy for one task or one remote operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Delay before attempt `next_attempt` (2-based; there is no delay
    /// before the first attempt). Grows geometrically, capped at
    /// `max_delay`.
    pub fn delay_before(&self, next_attempt: u32) -> Duration {
        let exponent = next_attempt.saturating_sub(2);
        let millis = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent as i32);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            initial_delay: cfg.initial_delay(),
            max_delay: cfg.max_delay(),
            backoff_multiplier: cfg.backoff_multiplier,
        }
    }
}

/// What happened across all attempts of one operation.
#[derive(Debug, Clone, Default)]
pub struct AttemptLog {
    /// Attempts actually made (>= 1 whenever the operation ran).
    pub attempts: u32,
    /// Total time spent sleeping between attempts.
    pub total_backoff: Duration,
}

/// Run `op` up to `policy.max_attempts` times, sleeping between attempts.
///
/// Only errors whose [`Retryable::is_retryable`] returns `true` are retried;
/// anything else is returned immediately. The final result is paired with an
/// [`AttemptLog`] so callers can report attempt counts.
pub async fn attempt<T, E, F, Fut>(policy: RetryPolicy, mut op: F) -> (Result<T, E>, AttemptLog)
where
    E: Retryable + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut log = AttemptLog::default();

    loop {
        log.attempts += 1;
        let attempt_no = log.attempts;

        match op(attempt_no).await {
            Ok(value) => return (Ok(value), log),
            Err(err) if err.is_retryable() && attempt_no < policy.max_attempts => {
                let delay = policy.delay_before(attempt_no + 1);
                warn!(
                    attempt = attempt_no,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed; backing off before retry"
                );
                log.total_backoff += delay;
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                debug!(attempts = attempt_no, error = %err, "giving up");
                return (Err(err), log);
            }
        }
    }
}
