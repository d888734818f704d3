//! Transaction driver shared by all backends.

use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use crate::error::{KvError, Result};
use crate::transaction::Transaction;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// How the driver retries units of work that fail with retryable errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,

    /// Delay before the first retry; doubles on each subsequent one.
    pub base_delay: Duration,

    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail on the first retryable error.
    pub fn no_retry() -> Self {
        Self::default().with_max_retries(0)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Exponential backoff for the given zero-based retry.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// A transactional key-value database.
///
/// Backends implement [`Database::run_once`], which executes a unit of work in
/// one transaction and commits it. Callers use [`Database::transact`], which
/// reruns the unit of work while it fails with a retryable error, so a unit
/// of work must be safe to run more than once.
#[async_trait]
pub trait Database: Send + Sync {
    /// Retry policy used by [`Database::transact`].
    fn retry_policy(&self) -> &RetryPolicy;

    /// Run `work` in a fresh transaction and commit it. No retries.
    fn run_once<T, F>(&self, work: &mut F) -> Result<T>
    where
        F: FnMut(&mut dyn Transaction) -> Result<T>;

    /// Run `work` transactionally, retrying conflicts per the retry policy.
    async fn transact<T, F>(&self, mut work: F) -> Result<T>
    where
        T: Send,
        F: FnMut(&mut dyn Transaction) -> Result<T> + Send,
    {
        let policy = self.retry_policy().clone();
        let mut attempt = 0u32;

        loop {
            let err = match self.run_once(&mut work) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => err,
                Err(err) => return Err(err),
            };

            if attempt >= policy.max_retries {
                return Err(KvError::RetryLimitExceeded {
                    attempts: attempt + 1,
                    last: Box::new(err),
                });
            }

            let delay = policy.delay(attempt);
            trace!(attempt = attempt + 1, ?delay, error = %err, "Retrying transaction");
            attempt += 1;
            tokio::time::sleep(delay).await;
        }
    }
}
