//! Retry wrapper for monitor RPC calls.
//!
//! # Responsibilities
//! - Retry a single RPC call while its error is transient
//! - Wait with doubling delay between attempts
//! - Give up after `max_retries` and surface the last error

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::blockchain::types::ChainResult;
use crate::config::schema::RetryConfig;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

/// Bounded exponential retry restricted to transient errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
            max_delay: retry_delay.saturating_mul(1 << 16),
            jitter: false,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt,
            self.retry_delay.as_millis() as u64,
            self.max_delay.as_millis() as u64,
            self.jitter,
        )
    }

    /// Run `call`, retrying transient failures.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> ChainResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ChainResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient RPC failure, backing off"
                    );
                    metrics::record_rpc_retry(operation);
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
