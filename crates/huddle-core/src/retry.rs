//! Bounded retry utility
//!
//! One retry loop serves every call site. A call site supplies the operation,
//! a predicate mapping each error to its class and the [`RetryPolicy`] of that
//! class (or `None` when the error must not be retried) and an observer that is told
//! about each retry before its delay starts.

use core::future::Future;
use core::hash::Hash;
use core::time::Duration;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Retry Policy
// ----------------------------------------------------------------------------

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelaySchedule {
    /// `base_delay × failed_attempt`
    Linear,
    /// `base_delay` before every retry
    Fixed,
}

/// Bounded retry policy for one failure class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first one
    pub max_attempts: u32,
    /// Base delay fed into the schedule
    pub base_delay: Duration,
    /// Delay growth
    pub schedule: DelaySchedule,
}

impl RetryPolicy {
    /// Single attempt, never retried
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            schedule: DelaySchedule::Fixed,
        }
    }

    /// Linearly increasing delay
    pub fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            schedule: DelaySchedule::Linear,
        }
    }

    /// Constant cooldown between attempts
    pub fn fixed(max_attempts: u32, cooldown: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: cooldown,
            schedule: DelaySchedule::Fixed,
        }
    }

    /// Whether another attempt is allowed after `failed_attempt` (1-based) failed
    pub fn allows_retry_after(&self, failed_attempt: u32) -> bool {
        failed_attempt < self.max_attempts
    }

    /// Delay to wait after `failed_attempt` (1-based) failed
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        match self.schedule {
            DelaySchedule::Linear => self.base_delay.saturating_mul(failed_attempt.max(1)),
            DelaySchedule::Fixed => self.base_delay,
        }
    }

    /// Longest delay this policy can produce
    pub fn longest_delay(&self) -> Duration {
        let last_retry = self.max_attempts.saturating_sub(1).max(1);
        self.delay_after(last_retry)
    }

    /// Sum of every delay this policy can produce
    pub fn total_delay(&self) -> Duration {
        (1..self.max_attempts)
            .map(|attempt| self.delay_after(attempt))
            .fold(Duration::ZERO, |acc, d| acc.saturating_add(d))
    }
}

// ----------------------------------------------------------------------------
// Retry Loop
// ----------------------------------------------------------------------------

/// Notice handed to the observer before a retry delay starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryNotice {
    /// Attempt that just failed (1-based)
    pub failed_attempt: u32,
    /// Attempt about to run after the delay
    pub next_attempt: u32,
    /// Failures so far of the same class as this one, this one included
    pub class_failures: u32,
    /// Delay before the next attempt
    pub delay: Duration,
}

/// Terminal failure of a retried operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Error class is not retryable; returned on first occurrence
    Aborted { error: E, attempts: u32 },
    /// Policy budget consumed
    Exhausted { error: E, attempts: u32 },
}

impl<E> RetryError<E> {
    pub fn error(&self) -> &E {
        match self {
            RetryError::Aborted { error, .. } | RetryError::Exhausted { error, .. } => error,
        }
    }

    pub fn into_error(self) -> E {
        match self {
            RetryError::Aborted { error, .. } | RetryError::Exhausted { error, .. } => error,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Aborted { attempts, .. } | RetryError::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Run `operation` until it succeeds or its errors run out of budget.
///
/// `classify` maps each error to its class and the policy of that class.
/// Budgets are kept per class: a failure is judged against the number of
/// failures of its own class, so a conflict after a server error still gets
/// its full conflict budget. The operation receives the overall attempt number.
pub async fn retry_classified<T, E, K, Op, Fut, P, O>(
    mut operation: Op,
    classify: P,
    mut on_retry: O,
) -> Result<T, RetryError<E>>
where
    K: Eq + Hash,
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> Option<(K, RetryPolicy)>,
    O: FnMut(&E, RetryNotice),
{
    let mut failures: HashMap<K, u32> = HashMap::new();
    let mut attempt: u32 = 1;
    loop {
        let error = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let Some((class, policy)) = classify(&error) else {
            return Err(RetryError::Aborted {
                error,
                attempts: attempt,
            });
        };

        let class_failures = failures.entry(class).or_insert(0);
        *class_failures += 1;
        let class_failures = *class_failures;

        if !policy.allows_retry_after(class_failures) {
            return Err(RetryError::Exhausted {
                error,
                attempts: attempt,
            });
        }

        let notice = RetryNotice {
            failed_attempt: attempt,
            next_attempt: attempt + 1,
            class_failures,
            delay: policy.delay_after(class_failures),
        };
        on_retry(&error, notice);
        tokio::time::sleep(notice.delay).await;
        attempt += 1;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
