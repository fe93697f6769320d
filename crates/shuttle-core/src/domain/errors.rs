//! Errors - 入力検証と State Service の契約違反

use thiserror::Error;

use super::ids::TaskId;
use super::status::TaskStatus;

/// Rejected input, detected before any transition happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("retry-after must be non-negative, got {0}s")]
    NegativeRetryAfter(i64),

    #[error("start-to-close timeout must be greater than zero")]
    ZeroTimeout,

    #[error("heartbeat timeout must be greater than zero")]
    ZeroHeartbeat,

    #[error("fan-out batch size must be greater than zero")]
    ZeroBatchSize,

    #[error("activity name must not be empty")]
    EmptyActivityName,

    #[error("activity arguments could not be encoded: {0}")]
    Arguments(String),
}

/// State Service errors.
///
/// `NotFound` / `InvalidTransition` / `UnexpectedResult` are caller bugs;
/// `Unavailable` means the backing storage could not be reached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("a result may only be stored with SUCCEEDED, got {status} for {id}")]
    UnexpectedResult { id: TaskId, status: TaskStatus },

    #[error("state storage unavailable: {0}")]
    Unavailable(String),
}
