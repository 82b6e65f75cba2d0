//! Bounded retry with exponential backoff for remote collaborator calls.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::error::{GenerationError, JudgeError, ValidationError};

/// Retry settings shared by the generator, refiner and judge calls.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// No retries and no sleeping. Handy for tests.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based): base, 2*base, 4*base, ... capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Whether an error is worth another attempt.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for GenerationError {
    fn is_retryable(&self) -> bool {
        !matches!(
            self,
            GenerationError::Unsafe(_) | GenerationError::ModelUnavailable(_)
        )
    }
}

/// A missing model will not appear between attempts.
impl Retryable for JudgeError {
    fn is_retryable(&self) -> bool {
        !matches!(self, JudgeError::ModelUnavailable(_))
    }
}

/// Only refiner transport failures are retried; a config that fails
/// validation is counted against the warmup budget instead.
impl Retryable for ValidationError {
    fn is_retryable(&self) -> bool {
        matches!(self, ValidationError::Refiner(_))
    }
}

/// Run `op` until it succeeds, returns a non-retryable error, or the policy's
/// attempts are exhausted. The last error is returned.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts && e.is_retryable() => {
                let delay = policy.delay_for(attempt);
                tracing::debug!(
                    call = label,
                    attempt,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Collaborator call failed, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::warn!(call = label, attempt, error = %e, "Collaborator call failed");
                return Err(e);
            }
        }
    }
}
