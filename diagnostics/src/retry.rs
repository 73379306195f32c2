//! This module provides retries with exponential backoff, full jitter and a
//! time budget.
//!
//! The request function decides what counts as a retryable outcome: it
//! returns [`AttemptError::RetryRequested`] (usually via
//! [`RetryTrigger::retry`]) to ask for another attempt, or
//! [`AttemptError::Failed`] to give up immediately.
//!
//! Attempt `n` (counting from zero) that asks for a retry waits
//! `backoff * 2^n` before the next attempt, or a uniform draw from
//! `[0, backoff * 2^n]` when jitter is on. Retrying stops once `attempts`
//! requests were made or, when a budget is set, once more than `budget` has
//! passed since the first attempt.
//!
//! ```
//! # #[cfg(feature = "rt-tokio")]
//! # {
//! use diagnostics::retry::{retry, AttemptError, RetryPolicy};
//! use diagnostics::runtime::Tokio;
//! use std::time::Duration;
//!
//! # async fn run() {
//! let policy = RetryPolicy {
//!     attempts: 5,
//!     backoff: Some(Duration::from_millis(100)),
//!     jitter: true,
//!     ..Default::default()
//! };
//! let status = retry(Tokio, &policy, |trigger| async move {
//!     let status: u16 = 503;
//!     if status >= 500 {
//!         return Err(trigger.retry::<std::io::Error>());
//!     }
//!     Ok::<_, AttemptError<std::io::Error>>(status)
//! })
//! .await;
//! # let _ = status;
//! # }
//! # }
//! ```
use crate::config::optional_millis;
use crate::diag_warn;
use crate::runtime::Runtime;
use rand::Rng;
use serde::Deserialize;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Configuration for retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Maximum number of requests, including the first. Defaults to 1.
    pub attempts: usize,
    /// Base delay of the exponential backoff. Without it retries happen
    /// immediately.
    #[serde(deserialize_with = "optional_millis")]
    pub backoff: Option<Duration>,
    /// Total time allowed for retrying, measured from the first attempt.
    #[serde(deserialize_with = "optional_millis")]
    pub budget: Option<Duration>,
    /// Randomize each delay over `[0, delay]`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 1,
            backoff: None,
            budget: None,
            jitter: false,
        }
    }
}

/// Why a single attempt did not produce a value.
#[derive(Error, Debug)]
pub enum AttemptError<E> {
    /// The attempt asked for another try.
    #[error("retry requested")]
    RetryRequested,
    /// The attempt failed in a way retrying will not fix.
    #[error("{0}")]
    Failed(E),
}

impl<E> From<E> for AttemptError<E> {
    fn from(err: E) -> Self {
        AttemptError::Failed(err)
    }
}

/// Outcome of a retried request that did not succeed.
#[derive(Error, Debug)]
pub enum RetryError<E> {
    /// Every allowed attempt asked for a retry, or the budget ran out.
    #[error("retries exhausted after {attempts} attempts in {elapsed:?}")]
    Exhausted {
        /// Requests made.
        attempts: usize,
        /// Time since the first attempt.
        elapsed: Duration,
    },
    /// An attempt failed with a non-retryable error.
    #[error("request failed: {0}")]
    Request(E),
}

/// Handed to every attempt; lets it ask for a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryTrigger {
    attempt: usize,
}

impl RetryTrigger {
    /// Zero based index of the current attempt.
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// The error that requests another attempt.
    pub fn retry<E>(&self) -> AttemptError<E> {
        AttemptError::RetryRequested
    }
}

/// What to do after an attempt asked for a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait this long, then make the next attempt.
    Wait(Duration),
    /// Stop retrying.
    Exhausted,
}

/// Synchronous retry bookkeeping, independent of any scheduler.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempts_made: usize,
    started: Instant,
}

impl RetryState {
    /// Start counting from now, the time of the first attempt.
    pub fn new(policy: RetryPolicy) -> Self {
        RetryState {
            policy,
            attempts_made: 0,
            started: Instant::now(),
        }
    }

    /// Requests made that asked for a retry.
    pub fn attempts_made(&self) -> usize {
        self.attempts_made
    }

    /// Time since the first attempt.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Record that the latest attempt asked for a retry and decide what
    /// happens next.
    pub fn on_retry_requested(&mut self) -> RetryDecision {
        let elapsed = self.elapsed();
        self.decide(elapsed)
    }

    fn decide(&mut self, elapsed: Duration) -> RetryDecision {
        let delay = self.next_delay();
        self.attempts_made = self.attempts_made.saturating_add(1);

        let over_budget = self.policy.budget.is_some_and(|budget| elapsed > budget);
        if self.attempts_made >= self.policy.attempts || over_budget {
            RetryDecision::Exhausted
        } else {
            RetryDecision::Wait(delay)
        }
    }

    fn next_delay(&self) -> Duration {
        let Some(backoff) = self.policy.backoff else {
            return Duration::ZERO;
        };
        let delay = u32::try_from(self.attempts_made)
            .ok()
            .and_then(|exponent| 1u32.checked_shl(exponent))
            .and_then(|factor| backoff.checked_mul(factor))
            .unwrap_or(Duration::MAX);

        if self.policy.jitter {
            full_jitter(delay)
        } else {
            delay
        }
    }
}

fn full_jitter(max: Duration) -> Duration {
    let max_micros = u64::try_from(max.as_micros()).unwrap_or(u64::MAX);
    Duration::from_micros(rand::rng().random_range(0..=max_micros))
}

/// Runs `request_fn` until it succeeds, fails for good or the policy is
/// exhausted.
///
/// # Arguments
///
/// * `runtime` - The async runtime to use for delays.
/// * `policy` - The retry policy configuration.
/// * `request_fn` - Builds one attempt from its [`RetryTrigger`].
pub async fn retry<R, F, Fut, T, E>(
    runtime: R,
    policy: &RetryPolicy,
    mut request_fn: F,
) -> Result<T, RetryError<E>>
where
    R: Runtime,
    F: FnMut(RetryTrigger) -> Fut,
    Fut: Future<Output = Result<T, AttemptError<E>>>,
    E: fmt::Display,
{
    let mut state = RetryState::new(policy.clone());

    loop {
        let trigger = RetryTrigger {
            attempt: state.attempts_made(),
        };
        match request_fn(trigger).await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Failed(err)) => {
                diag_warn!(
                    name: "Retry.RequestFailed",
                    attempt = trigger.attempt(),
                    reason = format!("{err}")
                );
                return Err(RetryError::Request(err));
            }
            Err(AttemptError::RetryRequested) => match state.on_retry_requested() {
                RetryDecision::Wait(delay) => {
                    if !delay.is_zero() {
                        runtime.delay(delay).await;
                    }
                }
                RetryDecision::Exhausted => {
                    return Err(RetryError::Exhausted {
                        attempts: state.attempts_made(),
                        elapsed: state.elapsed(),
                    });
                }
            },
        }
    }
}

/// A [`retry`] with its runtime and policy fixed, for reuse across call
/// sites.
#[derive(Debug, Clone)]
pub struct RetryLogic<R> {
    runtime: R,
    policy: RetryPolicy,
}

impl<R: Runtime> RetryLogic<R> {
    /// The policy every run uses.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Retry `request_fn` under the stored policy.
    pub async fn run<F, Fut, T, E>(&self, request_fn: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(RetryTrigger) -> Fut,
        Fut: Future<Output = Result<T, AttemptError<E>>>,
        E: fmt::Display,
    {
        retry(self.runtime.clone(), &self.policy, request_fn).await
    }
}

/// Close over a runtime and policy.
pub fn retry_logic<R: Runtime>(runtime: R, policy: RetryPolicy) -> RetryLogic<R> {
    RetryLogic { runtime, policy }
}
