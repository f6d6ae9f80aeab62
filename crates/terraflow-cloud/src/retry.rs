//! Retry policy for adapter calls (exponential backoff)

use crate::error::AdapterError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Backoff schedule applied uniformly around every adapter call
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Upper bound for a single delay
    pub max_delay: Duration,

    /// Backoff multiplier
    pub multiplier: f64,

    /// No retry is started once this much time has passed
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_elapsed: Duration::from_secs(5 * 60),
        }
    }
}

/// Why a retried call gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    /// Non-transient error, or transient errors until the budget ran out
    Failed { error: AdapterError, attempts: u32 },

    /// The run was cancelled while waiting for the next attempt
    Cancelled { error: AdapterError, attempts: u32 },
}

impl RetryError {
    pub fn error(&self) -> &AdapterError {
        match self {
            RetryError::Failed { error, .. } | RetryError::Cancelled { error, .. } => error,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Failed { attempts, .. } | RetryError::Cancelled { attempts, .. } => {
                *attempts
            }
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after the given (zero-based) failed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay)
        }
    }

    /// Run `operation` until it succeeds, fails permanently, or the retry
    /// budget is spent
    ///
    /// Returns the value and the number of attempts it took.
    pub async fn retry<T, F, Fut, P>(
        &self,
        cancel: &CancellationToken,
        is_transient: P,
        mut operation: F,
    ) -> Result<(T, u32), RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
        P: Fn(&AdapterError) -> bool,
    {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let error = match operation().await {
                Ok(value) => return Ok((value, attempt)),
                Err(error) => error,
            };

            if !is_transient(&error) || attempt >= self.max_attempts {
                return Err(RetryError::Failed {
                    error,
                    attempts: attempt,
                });
            }

            let delay = self.delay_for_attempt(attempt - 1);
            if started.elapsed() + delay > self.max_elapsed {
                return Err(RetryError::Failed {
                    error,
                    attempts: attempt,
                });
            }

            warn!(
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient error, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled { error, attempts: attempt });
                }
                _ = sleep(delay) => {}
            }
        }
    }
}
