//! Domain model (IDs, status, failures, task records).

pub mod errors;
pub mod failure;
pub mod ids;
pub mod status;
pub mod task;

pub use errors::{StateError, ValidationError};
pub use failure::{ActivityFailure, FailureKind, FailureReason, RetryAfter, TimeoutScope};
pub use ids::TaskId;
pub use status::TaskStatus;
pub use task::{
    ActivityCall, ActivityName, FailureRecord, Payload, Response, StatusChange, TaskRecord,
    Transition,
};
