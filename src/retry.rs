//! Exponential backoff with jitter for recoverable provider failures.
//!
//! Made public so callers can reuse the same policy for their own
//! operations that need retry logic, not just provider calls.

use crate::error::Error;
use rand::Rng;
use std::time::Duration;

/// A retry policy: number of attempts and the backoff curve between them.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(4),
            jitter_fraction: 0.10,
        }
    }
}

impl RetryPolicy {
    /// Backoff duration before attempt `attempt` (1-indexed), doubling each
    /// time and capped at `max_backoff`, with up to `jitter_fraction`
    /// random jitter added on top.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let scaled = self.initial_backoff.as_millis().saturating_mul(1u128 << exp);
        let capped = scaled.min(self.max_backoff.as_millis());
        let base = capped as u64;
        let jitter_max = (base as f64 * self.jitter_fraction) as u64;
        let jitter = if jitter_max == 0 { 0 } else { rand::thread_rng().gen_range(0..=jitter_max) };
        Duration::from_millis(base + jitter)
    }
}

/// Retries `operation` under `policy`, consulting `Error::is_recoverable`
/// and honoring `Error::retry_after` when present, in preference to the
/// computed backoff for that attempt.
pub async fn retry<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts && err.is_recoverable() => {
                let wait = err.retry_after().unwrap_or_else(|| policy.backoff_for_attempt(attempt));
                log::warn!("retryable error on attempt {attempt}: {err}; waiting {wait:?}");
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
