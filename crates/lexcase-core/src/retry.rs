use std::future::Future;
use std::time::Duration;

use crate::error::Result;

const BASE_DELAY: Duration = Duration::from_millis(200);
const MAX_DELAY: Duration = Duration::from_secs(5);

/// Bounded exponential backoff for provider calls.
///
/// Only errors classified by [`LexError::is_transient`](crate::error::LexError::is_transient)
/// are retried; anything else is returned on first failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// `retries = 0` runs the operation exactly once.
    pub fn new(retries: usize) -> Self {
        Self {
            retries,
            base_delay: BASE_DELAY,
            max_delay: MAX_DELAY,
        }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Delay before retry number `retry` (zero-based), doubling each time up
    /// to `max_delay`.
    pub fn delay_for(&self, retry: usize) -> Duration {
        let factor = 1u32.checked_shl(retry as u32).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    pub async fn run<F, Fut, T>(&self, operation: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retry = 0;
        loop {
            let err = match f().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if !err.is_transient() || retry >= self.retries {
                return Err(err);
            }

            let delay = self.delay_for(retry);
            tracing::warn!(
                operation,
                retry = retry + 1,
                retries = self.retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient provider error, retrying"
            );
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }
}
