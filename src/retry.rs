//! Bounded retry with exponential backoff for upstream calls
//!
//! Engine and annotator requests ride through here. Only errors the caller
//! marks retryable (network failures, 5xx) are retried; schema and logic
//! errors surface immediately. Backoff doubles per attempt up to a cap.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Errors opt in to retrying by classifying themselves.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for crate::error::Error {
    fn is_retryable(&self) -> bool {
        crate::error::Error::is_retryable(self)
    }
}

/// Retry budget for one logical operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, the first included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Run `operation` until it succeeds, exhausts the policy, or fails with a
/// non-retryable error. Returns the last error on giving up.
pub async fn retry_external<T, E, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut operation: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Retryable + Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = policy.initial_backoff();

    for attempt in 1..=max_attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                warn!(
                    operation = what,
                    attempt,
                    max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "retryable failure, backing off"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(policy.max_backoff());
            }
            Err(e) => return Err(e),
        }
    }
    unreachable!("loop returns on final attempt")
}

// ============================================================================
// Tests
// ============================================================================
