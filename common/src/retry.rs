//! Bounded retry loops
//!
//! Every wait in the test pipeline (SSH reachability, block device appearance) goes through a
//! [`RetryPolicy`]: a fixed number of attempts, an exponential backoff between them and an
//! overall deadline. A wait never runs unbounded.

use std::time::Duration;

/// Attempt budget, backoff and deadline for a bounded wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (at least one attempt is always made)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for the delay between attempts
    pub max_delay: Duration,
    /// Delay multiplier applied after every failed attempt
    pub multiplier: u32,
    /// Overall deadline measured from the first attempt
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2,
            timeout: Duration::from_secs(300),
        }
    }
}

/// Error returned once the retry budget is exhausted
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: E },
    #[error("timed out after {elapsed:?} and {attempts} attempt(s): {last}")]
    TimedOut {
        attempts: u32,
        elapsed: Duration,
        last: E,
    },
}

impl<E> RetryError<E> {
    /// The error returned by the final attempt
    pub fn last(&self) -> &E {
        match self {
            RetryError::Exhausted { last, .. } | RetryError::TimedOut { last, .. } => last,
        }
    }

    pub fn into_last(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } | RetryError::TimedOut { last, .. } => last,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::TimedOut { attempts, .. } => {
                *attempts
            }
        }
    }
}

impl RetryPolicy {
    /// Policy bounded only by a deadline, polling every `interval`
    pub fn with_timeout(timeout: Duration, interval: Duration) -> Self {
        let max_attempts = if interval.is_zero() {
            u32::MAX
        } else {
            let polls = timeout.as_millis() / interval.as_millis().max(1);
            (polls.min(u32::MAX as u128) as u32).saturating_add(1)
        };
        Self {
            max_attempts,
            initial_delay: interval,
            max_delay: interval,
            multiplier: 1,
            timeout,
        }
    }

    /// Delay to sleep after the given (1-based) failed attempt
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_delay;
        for _ in 1..attempt {
            delay = delay.saturating_mul(self.multiplier.max(1));
            if delay >= self.max_delay {
                return self.max_delay;
            }
        }
        delay.min(self.max_delay)
    }

    /// Run `op` until it succeeds or the budget is spent
    ///
    /// `what` names the operation in log messages. Each attempt is itself bounded by the time
    /// left until the deadline; an attempt cut short by the deadline never counts as a success.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display + From<Elapsed>,
    {
        let start = tokio::time::Instant::now();
        let deadline = start + self.timeout;
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout_at(deadline, op(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(E::from(Elapsed(self.timeout))),
            };
            let error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!("{} succeeded after {} attempts", what, attempt);
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };
            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                tracing::debug!("{} timed out after {:?}: {:#}", what, elapsed, error);
                return Err(RetryError::TimedOut {
                    attempts: attempt,
                    elapsed,
                    last: error,
                });
            }
            if attempt >= max_attempts {
                tracing::debug!("{} failed {} times, giving up: {:#}", what, attempt, error);
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }
            let delay = self
                .delay_after(attempt)
                .min(self.timeout.saturating_sub(elapsed));
            tracing::debug!(
                "{} attempt {}/{} failed: {:#}, retrying in {}",
                what,
                attempt,
                max_attempts,
                error,
                humantime::format_duration(delay)
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Marker for an attempt that was cut short by the policy deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deadline of {0:?} elapsed")]
pub struct Elapsed(pub Duration);
