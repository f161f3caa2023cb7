#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

//! # Retry for Client Connects
//!
//! Exponential backoff with optional jitter around the client's TCP connect. Only
//! transport failures that a later attempt could plausibly fix are retried. A failed
//! resumption handshake is never replayed: the next attempt must go through a fresh
//! coordinator so the store decision is made again.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{ErrorCode, TlsError};

/// Backoff schedule for client connects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_backoff: Duration,
    /// Upper bound on any single delay (before jitter)
    pub max_backoff: Duration,
    /// Add up to 50% random delay on top of each backoff
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy with jitter enabled
    #[must_use]
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self { max_attempts, initial_backoff, max_backoff, jitter: true }
    }

    /// Same policy with deterministic delays
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    ///
    /// Doubles from `initial_backoff` and is capped at `max_backoff`.
    #[must_use]
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(16);
        let base = self
            .initial_backoff
            .checked_mul(1u32 << doublings)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff);

        if !self.jitter {
            return base;
        }
        let extra_pct = rand::random::<u32>() % 51;
        base.saturating_add(base.saturating_mul(extra_pct) / 100)
    }

    /// Whether `err` on attempt number `attempt` earns another try
    #[must_use]
    pub fn should_retry(&self, err: &TlsError, attempt: u32) -> bool {
        attempt < self.max_attempts
            && matches!(
                err,
                TlsError::Io {
                    code: ErrorCode::ConnectionRefused
                        | ErrorCode::ConnectionTimeout
                        | ErrorCode::ConnectionReset,
                    ..
                }
            )
    }
}

/// Run `operation` until it succeeds or `policy` gives up
///
/// `operation_name` only labels log events.
///
/// # Errors
///
/// Returns the error of the last attempt.
pub async fn retry_with_policy<F, Fut, T>(
    policy: &RetryPolicy,
    operation: F,
    operation_name: &str,
) -> Result<T, TlsError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, TlsError>>,
{
    let mut attempt = 1u32;
    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation = operation_name, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !policy.should_retry(&err, attempt) {
            warn!(operation = operation_name, attempt, error = %err, "Giving up");
            return Err(err);
        }

        let delay = policy.backoff_for_attempt(attempt);
        debug!(operation = operation_name, attempt, ?delay, error = %err, "Retrying");
        tokio::time::sleep(delay).await;
        attempt = attempt.saturating_add(1);
    }
}
