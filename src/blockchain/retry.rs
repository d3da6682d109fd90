// src/blockchain/retry.rs
//! Bounded exponential backoff for pre-submission ledger calls.
//!
//! Only connecting, fee queries and pre-flight state queries go through
//! here. Nothing after a transaction has been handed to the ledger is ever
//! retried: resubmitting a broadcast transaction risks a nonce conflict.

use crate::error::ChainError;
use log::warn;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before retry number `retry` (1-based): `initial * 2^(retry-1)`, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Runs `operation` until it succeeds, fails permanently, or attempts run out.
    ///
    /// # Arguments
    /// * `label` - Name of the step, for logging
    /// * `operation` - Produces a fresh future per attempt
    ///
    /// # Returns
    /// The first success, or the last error. Non-transient errors are
    /// returned immediately.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, ChainError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        "{label} failed (attempt {attempt}/{}): {error}; retrying in {delay:?}",
                        self.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
