//! Task record: identity, lifecycle status, result and diagnostics.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::errors::{StateError, ValidationError};
use super::failure::FailureReason;
use super::ids::TaskId;
use super::status::TaskStatus;

/// Bounds every result payload type has to satisfy.
pub trait Payload: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Payload for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Name an activity is registered under, e.g. `ticker.fetch_news.v1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityName(String);

impl ActivityName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActivityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The unit of work a task performs: which activity, with which arguments.
///
/// Stored on the task so an orchestration can be resumed from the State
/// Service alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityCall {
    pub activity: ActivityName,
    pub args: serde_json::Value,

    /// Start-to-close override; `None` uses the proxy default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    /// Longest the executor may go without a heartbeat; `None` uses the
    /// proxy default, which may itself be unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_timeout: Option<Duration>,
}

impl ActivityCall {
    pub fn new(activity: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            activity: ActivityName::new(activity),
            args,
            timeout: None,
            heartbeat_timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_heartbeat(mut self, heartbeat_timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(heartbeat_timeout);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.activity.as_str().trim().is_empty() {
            return Err(ValidationError::EmptyActivityName);
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(ValidationError::ZeroTimeout);
        }
        if self.heartbeat_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ValidationError::ZeroHeartbeat);
        }
        Ok(())
    }
}

/// Result payload that is either free text or a structured value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Text(String),
    Json(serde_json::Value),
}

/// Last failure seen by a task, kept for external diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub reason: FailureReason,
    /// Attempt number the failure was observed on (0 = before any attempt).
    pub attempt: u32,
    pub at: DateTime<Utc>,
}

/// One applied status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub at: DateTime<Utc>,
}

/// The State Service's record of a task.
///
/// Only the State Service mutates it; everyone else works on copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord<T> {
    pub id: TaskId,
    pub call: ActivityCall,
    pub status: TaskStatus,

    /// Task that spawned this one as a workflow step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<TaskId>,

    /// Present only when `status == Succeeded`.
    pub result: Option<T>,

    /// Number of times the task entered `Running`.
    pub attempts: u32,
    pub last_failure: Option<FailureRecord>,

    /// When a `RetryScheduled` task becomes eligible to run again.
    pub next_attempt_at: Option<DateTime<Utc>>,

    pub history: Vec<StatusChange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<T> TaskRecord<T> {
    pub fn new(id: TaskId, call: ActivityCall, now: DateTime<Utc>) -> Self {
        Self {
            id,
            call,
            status: TaskStatus::Created,
            parent: None,
            result: None,
            attempts: 0,
            last_failure: None,
            next_attempt_at: None,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate and apply a transition. On error the record is left untouched.
    pub fn apply(&mut self, transition: Transition<T>, now: DateTime<Utc>) -> Result<(), StateError> {
        let Transition {
            status,
            result,
            failure,
            next_attempt_at,
        } = transition;

        if !self.status.can_transition_to(status) {
            return Err(StateError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: status,
            });
        }
        if result.is_some() && status != TaskStatus::Succeeded {
            return Err(StateError::UnexpectedResult {
                id: self.id,
                status,
            });
        }

        self.history.push(StatusChange {
            from: self.status,
            to: status,
            at: now,
        });
        self.status = status;
        match status {
            TaskStatus::Running => {
                self.attempts += 1;
                self.next_attempt_at = None;
            }
            TaskStatus::RetryScheduled => {
                self.next_attempt_at = Some(next_attempt_at.unwrap_or(now));
            }
            TaskStatus::Succeeded => {
                self.result = result;
                self.next_attempt_at = None;
            }
            _ => self.next_attempt_at = None,
        }
        if let Some(reason) = failure {
            self.last_failure = Some(FailureRecord {
                reason,
                attempt: self.attempts,
                at: now,
            });
        }
        self.updated_at = now;
        Ok(())
    }
}

/// A requested status change plus the data that travels with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition<T> {
    pub status: TaskStatus,
    pub result: Option<T>,
    pub failure: Option<FailureReason>,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl<T> Transition<T> {
    pub fn to(status: TaskStatus) -> Self {
        Self {
            status,
            result: None,
            failure: None,
            next_attempt_at: None,
        }
    }

    pub fn succeeded(result: T) -> Self {
        Self {
            result: Some(result),
            ..Self::to(TaskStatus::Succeeded)
        }
    }

    pub fn with_result(mut self, result: Option<T>) -> Self {
        self.result = result;
        self
    }

    pub fn with_failure(mut self, reason: impl Into<FailureReason>) -> Self {
        self.failure = Some(reason.into());
        self
    }

    pub fn retry_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_attempt_at = Some(at);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::failure::ActivityFailure;
    use chrono::TimeZone;
    use rstest::rstest;
    use serde_json::json;
    use ulid::Ulid;

    fn record() -> TaskRecord<serde_json::Value> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        TaskRecord::new(
            TaskId::from_ulid(Ulid::new()),
            ActivityCall::new("ticker.fetch.v1", json!({"symbol": "AAPL"})),
            t0,
        )
    }

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, secs).unwrap()
    }

    #[test]
    fn new_record_is_created() {
        let r = record();
        assert_eq!(r.status, TaskStatus::Created);
        assert_eq!(r.attempts, 0);
        assert!(r.result.is_none());
        assert_eq!(r.created_at, r.updated_at);
    }

    #[test]
    fn running_counts_attempts_and_advances_updated_at() {
        let mut r = record();
        r.apply(Transition::to(TaskStatus::Running), at(1)).unwrap();
        assert_eq!(r.attempts, 1);
        assert_eq!(r.updated_at, at(1));
        assert_eq!(r.history.len(), 1);
        assert_eq!(r.history[0].from, TaskStatus::Created);
    }

    #[test]
    fn invalid_transition_leaves_record_unchanged() {
        let mut r = record();
        let before = r.clone();
        let err = r
            .apply(Transition::succeeded(json!({})), at(1))
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidTransition { .. }));
        assert_eq!(r, before);
    }

    #[test]
    fn result_is_rejected_outside_succeeded() {
        let mut r = record();
        r.apply(Transition::to(TaskStatus::Running), at(1)).unwrap();
        let before = r.clone();
        let err = r
            .apply(
                Transition::to(TaskStatus::Failed).with_result(Some(json!("x"))),
                at(2),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            StateError::UnexpectedResult {
                status: TaskStatus::Failed,
                ..
            }
        ));
        assert_eq!(r, before);
    }

    #[test]
    fn retry_scheduled_keeps_resume_time_and_failure() {
        let mut r = record();
        r.apply(Transition::to(TaskStatus::Running), at(1)).unwrap();
        r.apply(
            Transition::to(TaskStatus::RetryScheduled)
                .with_failure(ActivityFailure::rate_limited(2).unwrap())
                .retry_at(at(3)),
            at(1),
        )
        .unwrap();
        assert_eq!(r.next_attempt_at, Some(at(3)));
        let failure = r.last_failure.as_ref().unwrap();
        assert_eq!(failure.attempt, 1);

        r.apply(Transition::to(TaskStatus::Running), at(3)).unwrap();
        assert_eq!(r.next_attempt_at, None);
        assert_eq!(r.attempts, 2);
    }

    #[rstest]
    #[case::empty_name(ActivityCall::new("  ", json!(null)), ValidationError::EmptyActivityName)]
    #[case::zero_timeout(
        ActivityCall::new("a", json!(null)).with_timeout(Duration::ZERO),
        ValidationError::ZeroTimeout
    )]
    #[case::zero_heartbeat(
        ActivityCall::new("a", json!(null)).with_heartbeat(Duration::ZERO),
        ValidationError::ZeroHeartbeat
    )]
    fn malformed_calls_are_rejected(#[case] call: ActivityCall, #[case] expected: ValidationError) {
        assert_eq!(call.validate(), Err(expected));
    }

    #[test]
    fn parent_link_is_optional_on_the_wire() {
        let root = record();
        let v = serde_json::to_value(&root).unwrap();
        assert!(v.get("parent").is_none());

        let mut child = record();
        child.parent = Some(root.id);
        let v = serde_json::to_value(&child).unwrap();
        let back: TaskRecord<serde_json::Value> = serde_json::from_value(v).unwrap();
        assert_eq!(back.parent, Some(root.id));
    }

    #[test]
    fn response_is_text_or_json() {
        let text: Response = serde_json::from_value(json!("plain")).unwrap();
        assert_eq!(text, Response::Text("plain".into()));

        let structured: Response = serde_json::from_value(json!({"symbol": "AAPL"})).unwrap();
        assert_eq!(structured, Response::Json(json!({"symbol": "AAPL"})));
    }
}
