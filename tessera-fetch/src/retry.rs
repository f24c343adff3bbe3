use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::FetchError;

/// Bounded retry with exponential backoff for provider fetches.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each one after.
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Randomize each delay into [0.5x, 1.0x].
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that performs a single attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// base × 2^attempt, capped at `max_delay` (attempt is 0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let factor = if self.jitter {
            rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            1.0
        };
        Duration::from_secs_f64(capped * factor)
    }
}

/// Run `f` until it succeeds, fails with a timeout, or attempts run out.
///
/// A timeout is returned immediately without another attempt.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, what: &str, mut f: F) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        tracing::debug!(what, attempt = attempt + 1, "fetch attempt");
        match f().await {
            Ok(val) => return Ok(val),
            Err(e) if !e.is_retryable() => {
                tracing::warn!(what, attempt = attempt + 1, error = %e, "fetch failed, not retrying");
                return Err(e);
            }
            Err(e) if attempt + 1 >= attempts => {
                tracing::warn!(what, attempt = attempt + 1, error = %e, "final fetch attempt failed");
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    what,
                    attempt = attempt + 1,
                    max = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "fetch attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Bound a single call by `limit`, independent of any retry backoff.
pub async fn with_timeout<T, Fut>(limit: Duration, what: &str, fut: Fut) -> Result<T, FetchError>
where
    Fut: Future<Output = Result<T, FetchError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout {
            what: what.to_string(),
            after: limit,
        }),
    }
}
