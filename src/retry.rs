//! Retry-with-timeout combinator shared by every idempotent read.
//!
//! Each attempt is bounded by the policy's per-attempt timeout, clipped to
//! the run deadline. Transaction submissions never go through here.

use std::future::Future;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// Doubles from `base` on every retry, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub retries: u32,
    pub attempt_timeout: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(retries: u32, attempt_timeout: Duration) -> Self {
        Self {
            retries,
            attempt_timeout,
            backoff: Backoff::Fixed(Duration::from_millis(100)),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Absolute point in time after which a run stops starting new work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Shortens `duration` so it does not run past the deadline.
    pub fn clip(&self, duration: Duration) -> Duration {
        duration.min(self.remaining())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    #[error("timed out after {attempts} attempt(s)")]
    TimedOut { attempts: u32 },
    #[error("{error} (after {attempts} attempt(s))")]
    Failed { attempts: u32, error: E },
    #[error("run deadline exceeded")]
    DeadlineExceeded,
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::TimedOut { attempts } | RetryError::Failed { attempts, .. } => *attempts,
            RetryError::DeadlineExceeded => 0,
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-transient error, or
/// the retry budget is spent.
pub async fn retry<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    deadline: Option<Deadline>,
    is_transient: P,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempts = 0u32;
    loop {
        let attempt_timeout = match deadline {
            Some(deadline) if deadline.is_expired() => {
                return Err(RetryError::DeadlineExceeded);
            }
            Some(deadline) => deadline.clip(policy.attempt_timeout),
            None => policy.attempt_timeout,
        };
        attempts += 1;

        let failure = match timeout(attempt_timeout, operation()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(error)) => {
                let transient = is_transient(&error);
                let failure = RetryError::Failed { attempts, error };
                if !transient {
                    return Err(failure);
                }
                failure
            }
            Err(_) => RetryError::TimedOut { attempts },
        };

        if attempts > policy.retries {
            return Err(failure);
        }
        let delay = policy.backoff.delay(attempts);
        if deadline.is_some_and(|deadline| deadline.remaining() <= delay) {
            return Err(failure);
        }
        debug!(attempts, delay_ms = delay.as_millis() as u64, "retrying after failed attempt");
        sleep(delay).await;
    }
}

/// [`retry`] treating every error as transient.
pub async fn go<T, E, F, Fut>(
    policy: &RetryPolicy,
    deadline: Option<Deadline>,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry(policy, deadline, |_| true, operation).await
}
