//! Retry policy: decides whether and when a failed attempt runs again.

use std::time::Duration;

use crate::config::ShuttleConfig;
use crate::domain::ActivityFailure;

/// What the orchestrator does after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Move to `RetryScheduled` and re-attempt after the delay.
    RetryAfter(Duration),
    /// Terminal `TimedOut`.
    TimeOut,
    /// Terminal `Failed`.
    Fail,
}

/// Retry policy for failed activity calls.
///
/// Rate limits are retried after the executor's own hint. Timeouts are
/// terminal unless `retry_timeouts` is set, in which case they back off
/// exponentially. Everything shares one `max_retries` budget, so a task makes
/// at most `max_retries + 1` proxy invocations.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_timeouts: bool,

    /// Base delay for the first timeout retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// No single backoff delay exceeds this.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ShuttleConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_timeouts: config.retry_timeouts,
            base_delay: config.timeout_backoff_base,
            multiplier: config.timeout_backoff_multiplier,
            max_delay: config.timeout_backoff_max,
        }
    }

    fn has_budget(&self, attempts: u32) -> bool {
        attempts <= self.max_retries
    }

    /// Decide after attempt number `attempts` (1-based) failed with `failure`.
    pub fn decide(&self, failure: &ActivityFailure, attempts: u32) -> RetryDecision {
        match failure {
            ActivityFailure::RateLimitExceeded { retry_after } if self.has_budget(attempts) => {
                RetryDecision::RetryAfter(retry_after.as_duration())
            }
            ActivityFailure::RateLimitExceeded { .. } => RetryDecision::Fail,
            ActivityFailure::RequestTimeout { .. }
                if self.retry_timeouts && self.has_budget(attempts) =>
            {
                RetryDecision::RetryAfter(self.next_delay(attempts))
            }
            ActivityFailure::RequestTimeout { .. } => RetryDecision::TimeOut,
            ActivityFailure::Unclassified { .. } => RetryDecision::Fail,
        }
    }

    /// A `Running` task whose outcome was lost is re-attempted immediately,
    /// within the same budget.
    pub fn decide_interrupted(&self, attempts: u32) -> RetryDecision {
        if self.has_budget(attempts) {
            RetryDecision::RetryAfter(Duration::ZERO)
        } else {
            RetryDecision::Fail
        }
    }

    /// Exponential backoff: `base_delay * multiplier^(attempts - 1)`, capped
    /// at `max_delay`.
    ///
    /// Example with base_delay=2s, multiplier=2.0, max_delay=5m:
    /// - attempt 1: 2s
    /// - attempt 2: 4s
    /// - attempt 3: 8s
    /// - attempt 9 and later: 5m
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = i32::try_from(attempts.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        // 桁あふれ (inf) は上限に丸める
        Duration::try_from_secs_f64(delay_secs)
            .unwrap_or(Duration::MAX)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ShuttleConfig::default())
    }
}
