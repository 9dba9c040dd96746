//! Bounded retry with linearly growing backoff.
//!
//! Attempt `n` (zero-based) that fails with a retriable error is followed
//! by a sleep of `(2n + 1)` time units. After `max_attempts` failures the
//! policy gives up with [`RetryError::Exhausted`]. Non-retriable errors
//! are returned immediately without consuming the budget. A budget of zero
//! disables retrying: the action runs exactly once.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

/// Classification hook used by [`RetryPolicy`].
pub trait Retriable {
    /// Whether the failure is transient and worth another attempt.
    fn is_retriable(&self) -> bool;
}

/// Terminal outcome of a retried action.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed with a retriable error.
    #[error("max attempts reached ({attempts}): {last}")]
    Exhausted { attempts: u32, last: E },

    /// The action failed with a non-retriable error, or retry is disabled.
    #[error("{0}")]
    Failed(E),
}

impl<E> RetryError<E> {
    /// The underlying error of the last attempt.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Failed(e) => e,
        }
    }

    pub fn inner(&self) -> &E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Failed(e) => e,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

/// Attempt budget and backoff unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RetryPolicy {
    /// Backoff unit used unless overridden with [`RetryPolicy::with_unit`].
    pub const DEFAULT_UNIT: Duration = Duration::from_secs(1);

    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            unit: Self::DEFAULT_UNIT,
        }
    }

    /// A policy that runs the action exactly once.
    pub fn disabled() -> Self {
        Self::new(0)
    }

    pub fn with_unit(mut self, unit: Duration) -> Self {
        self.unit = unit;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Sleep that follows the failed attempt numbered `attempts_so_far`.
    pub fn backoff(&self, attempts_so_far: u32) -> Duration {
        self.unit * (2 * attempts_so_far + 1)
    }

    /// Run `action` under this policy.
    pub async fn run<T, E, F, Fut>(&self, mut action: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retriable + Display,
    {
        if self.max_attempts == 0 {
            return action().await.map_err(RetryError::Failed);
        }

        let mut attempts = 0;
        loop {
            let err = match action().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retriable() => {
                    debug!(error = %e, "non-retriable failure");
                    return Err(RetryError::Failed(e));
                }
                Err(e) => e,
            };

            let delay = self.backoff(attempts);
            attempts += 1;
            warn!(
                attempt = attempts,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retriable failure, backing off"
            );
            tokio::time::sleep(delay).await;

            if attempts >= self.max_attempts {
                return Err(RetryError::Exhausted {
                    attempts,
                    last: err,
                });
            }
        }
    }
}
