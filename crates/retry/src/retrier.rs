//! Cancellation-aware retry loop.

use std::fmt::Display;
use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::{Backoff, RetryError};

/// Decides whether a failed attempt is worth repeating.
///
/// Consulted after every failed attempt, not only the first.
pub trait Classifier<E: ?Sized>: Send + Sync {
    /// Returns true if another attempt may succeed.
    fn is_retryable(&self, error: &E) -> bool;
}

impl<E: ?Sized, F> Classifier<E> for F
where
    F: Fn(&E) -> bool + Send + Sync,
{
    fn is_retryable(&self, error: &E) -> bool {
        self(error)
    }
}

/// Treats every error as transient.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetry;

impl<E: ?Sized> Classifier<E> for AlwaysRetry {
    fn is_retryable(&self, _error: &E) -> bool {
        true
    }
}

/// Attempt budget and delay schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts; zero retries until cancelled.
    pub max_attempts: u32,
    /// Delay schedule between attempts.
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

/// Runs an attempt function until it succeeds, fails terminally, exhausts
/// its budget or is cancelled.
///
/// The retrier is stateless between calls and can be shared by any number of
/// concurrent callers.
#[derive(Debug, Clone)]
pub struct Retrier<C = AlwaysRetry> {
    policy: RetryPolicy,
    classifier: C,
}

impl Retrier<AlwaysRetry> {
    /// Creates a retrier with the default policy that retries every error.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for Retrier<AlwaysRetry> {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            classifier: AlwaysRetry,
        }
    }
}

impl<C> Retrier<C> {
    /// Creates a retrier from an explicit policy and classifier.
    pub fn from_policy(policy: RetryPolicy, classifier: C) -> Self {
        Self { policy, classifier }
    }

    /// Sets the attempt budget; zero means unbounded.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.policy.max_attempts = max_attempts;
        self
    }

    /// Sets the delay schedule.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.policy.backoff = backoff;
        self
    }

    /// Replaces the classifier.
    pub fn with_classifier<C2>(self, classifier: C2) -> Retrier<C2> {
        Retrier {
            policy: self.policy,
            classifier,
        }
    }

    /// Returns the policy in use.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `attempt_fn` with zero-based attempt numbers.
    ///
    /// Returns the first success. Returns [`RetryError::Unretryable`] as soon
    /// as the classifier rejects an error, [`RetryError::AttemptsExhausted`]
    /// once the budget is spent, and [`RetryError::Cancelled`] if `cancel`
    /// fires before an attempt or during a backoff wait. No wait follows the
    /// final permitted attempt.
    pub async fn run<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut attempt_fn: F,
    ) -> Result<T, RetryError<E>>
    where
        C: Classifier<E>,
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            let error = match attempt_fn(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            metrics::counter!("retry_attempts_failed_total").increment(1);

            if !self.classifier.is_retryable(&error) {
                tracing::debug!(attempt, error = %error, "terminal error, not retrying");
                return Err(RetryError::Unretryable(error));
            }

            let attempts_made = attempt.saturating_add(1);
            if self.policy.max_attempts != 0 && attempts_made >= self.policy.max_attempts {
                tracing::debug!(attempts = attempts_made, error = %error, "retry budget exhausted");
                return Err(RetryError::AttemptsExhausted {
                    attempts: attempts_made,
                    last: error,
                });
            }

            let delay = self.policy.backoff.next(attempt);
            tracing::warn!(
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "attempt failed, retrying after delay"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(RetryError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }

            attempt = attempts_made;
        }
    }
}
