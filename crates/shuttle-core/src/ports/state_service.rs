//! StateService port - Task レコードの正本（source of truth）
//!
//! # 設計原則
//! - Task を変更できるのは StateService だけ
//! - 同じ id への遷移は直列化される。異なる id は独立
//! - 遷移は `TaskStatus::can_transition_to` で検証される

use async_trait::async_trait;

use crate::domain::{ActivityCall, Payload, StateError, TaskId, TaskRecord, TaskStatus, Transition};

/// Durable record-keeping for tasks, generic over the result payload `T`.
#[async_trait]
pub trait StateService<T: Payload>: Send + Sync {
    /// Allocate a new task in `Created` with a fresh id, optionally linked to
    /// the workflow step that spawned it. An unknown `parent` is `NotFound`.
    async fn create_with_parent(
        &self,
        call: ActivityCall,
        parent: Option<TaskId>,
    ) -> Result<TaskRecord<T>, StateError>;

    /// Allocate a new top-level task in `Created`.
    async fn create(&self, call: ActivityCall) -> Result<TaskRecord<T>, StateError> {
        self.create_with_parent(call, None).await
    }

    async fn get(&self, id: TaskId) -> Result<TaskRecord<T>, StateError>;

    /// Apply a validated transition and return the updated record.
    async fn transition(&self, id: TaskId, transition: Transition<T>) -> Result<TaskRecord<T>, StateError>;

    /// All records, in creation order.
    async fn list(&self) -> Result<Vec<TaskRecord<T>>, StateError>;

    /// Plain status change, optionally carrying the `Succeeded` result.
    async fn set_status(&self, id: TaskId, status: TaskStatus, result: Option<T>) -> Result<(), StateError> {
        self.transition(id, Transition::to(status).with_result(result))
            .await
            .map(|_| ())
    }

    /// Direct children of `parent`, in creation order.
    async fn children(&self, parent: TaskId) -> Result<Vec<TaskRecord<T>>, StateError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|r| r.parent == Some(parent))
            .collect())
    }

    /// Records an orchestrator should pick up again after a restart.
    async fn unfinished(&self) -> Result<Vec<TaskRecord<T>>, StateError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|r| !r.status.is_terminal())
            .collect())
    }
}
