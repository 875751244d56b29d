//! Fixed-delay retry for storage operations.

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use crate::error::{Result, StoreError};

pub const DEFAULT_MAX_RETRIES: u32 = 10;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 200;

/// Attempt budget and inter-attempt delay for a storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    pub fn from_millis(max_attempts: u32, delay_ms: u64) -> Self {
        Self::new(max_attempts, Duration::from_millis(delay_ms))
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    ///
    /// Every failure short of the budget sleeps for the configured delay
    /// before the next attempt. The final failure is reported with the
    /// attempt count and the last underlying error. A budget of zero is
    /// treated as one attempt.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let budget = self.max_attempts.max(1);
        let mut attempts = 0;
        loop {
            attempts += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempts >= budget => {
                    error!("{} failed after {} attempts: {}", what, attempts, e);
                    return Err(StoreError::RetriesExhausted {
                        attempts,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!("{} attempt {} failed: {}. Retrying...", what, attempts, e);
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}
