//! Failure taxonomy.
//!
//! `ActivityFailure` is the closed set of ways an activity call can fail. The
//! orchestrator's retry policy reads nothing else. `FailureReason` wraps it
//! with the few reasons that originate on the orchestration side (cancel,
//! interruption, malformed input) so a task record can explain why it ended.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use super::errors::ValidationError;

/// Backoff hint carried by a rate-limit failure, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetryAfter(u64);

impl RetryAfter {
    pub const ZERO: RetryAfter = RetryAfter(0);

    /// Validating constructor; negative hints are rejected.
    pub fn from_secs(secs: i64) -> Result<Self, ValidationError> {
        u64::try_from(secs)
            .map(Self)
            .map_err(|_| ValidationError::NegativeRetryAfter(secs))
    }

    pub fn as_secs(self) -> u64 {
        self.0
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.0)
    }
}

impl fmt::Display for RetryAfter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// Which budget a [`ActivityFailure::RequestTimeout`] ran out of.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutScope {
    /// The whole call took longer than its start-to-close budget.
    #[default]
    StartToClose,
    /// The executor went quiet for longer than its heartbeat budget.
    Heartbeat,
}

impl fmt::Display for TimeoutScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutScope::StartToClose => f.write_str("start-to-close"),
            TimeoutScope::Heartbeat => f.write_str("heartbeat"),
        }
    }
}

/// How an activity call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityFailure {
    /// Recoverable; the executor asked us to come back later.
    #[error("rate limit exceeded, retry after {retry_after}")]
    RateLimitExceeded { retry_after: RetryAfter },

    /// A budget elapsed before the call finished. Side effects are unknown.
    #[error("activity exceeded its {scope} budget of {budget:?}")]
    RequestTimeout {
        budget: Duration,
        #[serde(default)]
        scope: TimeoutScope,
    },

    #[error("{cause}")]
    Unclassified { cause: String },
}

impl ActivityFailure {
    pub fn rate_limited(retry_after_secs: i64) -> Result<Self, ValidationError> {
        Ok(Self::RateLimitExceeded {
            retry_after: RetryAfter::from_secs(retry_after_secs)?,
        })
    }

    pub fn timed_out(budget: Duration) -> Self {
        Self::RequestTimeout {
            budget,
            scope: TimeoutScope::StartToClose,
        }
    }

    /// No heartbeat arrived within `budget`.
    pub fn heartbeat_missed(budget: Duration) -> Self {
        Self::RequestTimeout {
            budget,
            scope: TimeoutScope::Heartbeat,
        }
    }

    pub fn unclassified(cause: impl fmt::Display) -> Self {
        Self::Unclassified {
            cause: cause.to_string(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ActivityFailure::RateLimitExceeded { .. } => FailureKind::RateLimitExceeded,
            ActivityFailure::RequestTimeout { .. } => FailureKind::RequestTimeout,
            ActivityFailure::Unclassified { .. } => FailureKind::Unclassified,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, ActivityFailure::RateLimitExceeded { .. })
    }
}

/// Fieldless tag of [`ActivityFailure`], handy for logs and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RateLimitExceeded,
    RequestTimeout,
    Unclassified,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::RateLimitExceeded => "rate_limit_exceeded",
            FailureKind::RequestTimeout => "request_timeout",
            FailureKind::Unclassified => "unclassified",
        };
        f.write_str(s)
    }
}

/// Why a task left the happy path, as recorded on the task.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    #[error(transparent)]
    Activity(ActivityFailure),

    #[error("cancelled by caller")]
    Cancelled,

    /// The process stopped while the task was `Running` and no outcome was recorded.
    #[error("orchestration interrupted while running")]
    Interrupted,

    #[error("invalid input: {message}")]
    InvalidInput { message: String },
}

impl From<ActivityFailure> for FailureReason {
    fn from(failure: ActivityFailure) -> Self {
        FailureReason::Activity(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::zero(0)]
    #[case::positive(2)]
    #[case::large(86_400)]
    fn non_negative_retry_after_is_valid(#[case] secs: i64) {
        let failure = ActivityFailure::rate_limited(secs).unwrap();
        assert!(failure.is_recoverable());
        assert_eq!(
            failure,
            ActivityFailure::RateLimitExceeded {
                retry_after: RetryAfter(secs as u64)
            }
        );
    }

    #[test]
    fn negative_retry_after_fails_validation() {
        let err = ActivityFailure::rate_limited(-1).unwrap_err();
        assert_eq!(err, ValidationError::NegativeRetryAfter(-1));
    }

    #[test]
    fn only_rate_limits_are_recoverable() {
        assert!(!ActivityFailure::timed_out(Duration::from_secs(1)).is_recoverable());
        assert!(!ActivityFailure::unclassified("boom").is_recoverable());
    }

    #[test]
    fn failure_is_tagged_by_kind() {
        let v = serde_json::to_value(ActivityFailure::rate_limited(5).unwrap()).unwrap();
        assert_eq!(v["kind"], "rate_limit_exceeded");
        assert_eq!(v["retry_after"], 5);

        let reason = FailureReason::from(ActivityFailure::unclassified("dns"));
        let v = serde_json::to_value(&reason).unwrap();
        assert_eq!(v["reason"], "activity");
        assert_eq!(v["kind"], "unclassified");
        assert_eq!(v["cause"], "dns");
    }

    #[test]
    fn heartbeat_timeout_is_a_request_timeout() {
        let failure = ActivityFailure::heartbeat_missed(Duration::from_secs(30));
        assert_eq!(failure.kind(), FailureKind::RequestTimeout);
        assert_ne!(failure, ActivityFailure::timed_out(Duration::from_secs(30)));
        assert_eq!(
            failure.to_string(),
            "activity exceeded its heartbeat budget of 30s"
        );
    }

    #[test]
    fn stored_timeout_without_scope_reads_as_start_to_close() {
        let v = serde_json::json!({"kind": "request_timeout", "budget": {"secs": 2, "nanos": 0}});
        let failure: ActivityFailure = serde_json::from_value(v).unwrap();
        assert_eq!(failure, ActivityFailure::timed_out(Duration::from_secs(2)));
    }

    #[test]
    fn kind_matches_variant() {
        assert_eq!(
            ActivityFailure::timed_out(Duration::from_secs(3)).kind(),
            FailureKind::RequestTimeout
        );
        assert_eq!(
            ActivityFailure::unclassified("x").kind().to_string(),
            "unclassified"
        );
    }
}
