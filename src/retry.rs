//! Retry with exponential backoff
//!
//! [`RetryPolicy`] wraps any async call. The call reports each failure as
//! retryable or fatal; retryable failures are reissued after a delay until
//! the retry budget runs out.

use crate::config::RetryConfig;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// How one attempt of a call failed
#[derive(Debug)]
pub enum CallFailure<E> {
    /// Transient failure (configured status code, transport error, timeout)
    Retryable {
        reason: String,
        /// Server-provided "retry after" delay
        retry_after: Option<Duration>,
    },
    /// Failure that another attempt would not fix
    Fatal(E),
}

impl<E> CallFailure<E> {
    pub fn retryable(reason: impl Into<String>) -> Self {
        CallFailure::Retryable {
            reason: reason.into(),
            retry_after: None,
        }
    }
}

/// Final failure of a call after the policy gave up
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {reason}")]
    Exhausted { attempts: u32, reason: String },

    #[error("{0}")]
    Fatal(E),
}

/// Delay schedule and retry budget
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub start_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    /// Status codes treated as transient
    pub http_codes: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            start_delay: seconds_or_max(config.start_delay),
            max_delay: seconds_or_max(config.max_delay),
            exponential_base: config.exponential_base,
            http_codes: config.http_codes.clone(),
        }
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.http_codes.contains(&status)
    }

    /// Delay before retry number `retry` (1-based)
    ///
    /// A server-provided `retry_after` wins over the backoff schedule; both
    /// are capped at `max_delay`.
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(after) = retry_after {
            return after.min(self.max_delay);
        }

        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.start_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let max = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= max {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    /// Runs `op` until it succeeds, fails fatally, or the retries run out
    ///
    /// `op` receives the 1-based attempt number. Every attempt is a fresh
    /// call; nothing is deduplicated between attempts.
    ///
    /// # Arguments
    ///
    /// * `label` - Identifies the call in log lines (usually the URL)
    /// * `op` - Produces one attempt of the call
    pub async fn execute<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, CallFailure<E>>>,
    {
        let mut attempt: u32 = 1;
        loop {
            let (reason, retry_after) = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(CallFailure::Fatal(e)) => return Err(RetryError::Fatal(e)),
                Err(CallFailure::Retryable {
                    reason,
                    retry_after,
                }) => (reason, retry_after),
            };

            if attempt > self.max_retries {
                tracing::error!(
                    call = label,
                    attempt = attempt,
                    reason = %reason,
                    "Gave up retrying"
                );
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    reason,
                });
            }

            let delay = self.delay_for(attempt, retry_after);
            tracing::warn!(
                call = label,
                attempt = attempt,
                delay_secs = delay.as_secs_f64(),
                reason = %reason,
                "Retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Non-negative seconds as a `Duration`, saturating at `Duration::MAX`
fn seconds_or_max(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

/// Parses a `Retry-After` header given in (possibly fractional) seconds
///
/// HTTP-date values and anything else unparseable yield `None`, which makes
/// the policy fall back to its backoff schedule. Values too large for a
/// `Duration` saturate; [`RetryPolicy::delay_for`] caps them anyway.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
    } else {
        None
    }
}
