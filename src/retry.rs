//! Exponential backoff shared by the read-only backend calls.
//!
//! Embedding and index queries are idempotent, so transient failures are
//! retried. Generation calls never go through here.

use std::thread;
use std::time::Duration;

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    /// Returns `true` for transient errors (network, timeout, 429, 5xx).
    fn is_transient(&self) -> bool;
}

/// Delays slept between attempts.
///
/// The number of retries equals the number of delays, so the default policy
/// makes at most four attempts: the first call plus retries after 1s, 2s and 4s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    /// Creates a policy with explicit delays between attempts.
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self { delays: Vec::new() }
    }

    /// Maximum number of retries after the first attempt.
    pub fn max_retries(&self) -> usize {
        self.delays.len()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4),
        ])
    }
}

/// Retries an operation with the delays of `policy`.
///
/// Only transient errors are retried. Non-transient errors are returned
/// immediately, and the last error is returned once the delays run out.
pub fn retry_with_backoff<F, T, E>(policy: &RetryPolicy, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: Retryable + std::fmt::Display,
{
    let mut last_error = match f() {
        Ok(result) => return Ok(result),
        Err(e) if !e.is_transient() => return Err(e),
        Err(e) => e,
    };

    for (attempt, delay) in policy.delays.iter().enumerate() {
        tracing::debug!(
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            error = %last_error,
            "retrying after transient error"
        );
        thread::sleep(*delay);

        match f() {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => last_error = e,
        }
    }

    Err(last_error)
}
