//! Multi-step workflows built from ordinary tasks.
//!
//! Every step is its own task record, linked to the step that spawned it
//! through `TaskRecord::parent`, so each one is retried, resumed and
//! cancelled like any other task.
//!
//! - [`sequence`](WorkflowOrchestrator::sequence): 前のステップの結果から次の呼び出しを決める
//! - [`fan_out`](WorkflowOrchestrator::fan_out): 子タスクを `batch_size` 件ずつ並行に実行
//! - [`expand`](WorkflowOrchestrator::expand): 先頭ステップの結果から子タスクを作って fan-out

use tracing::{info, instrument, warn};

use super::orchestrator::{OrchestratorError, WorkflowOrchestrator};
use crate::domain::{ActivityCall, Payload, TaskId, TaskRecord, TaskStatus, ValidationError};

/// How [`WorkflowOrchestrator::fan_out`] batches child tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanOut {
    /// Children started together. The next batch starts once every child in
    /// this one is terminal.
    pub batch_size: usize,

    /// Start no further batches after one in which a child did not succeed.
    pub stop_on_failure: bool,
}

impl FanOut {
    pub const DEFAULT_BATCH_SIZE: usize = 3;

    /// Batches of `batch_size`, stopping at the first failed batch.
    pub fn batches_of(batch_size: usize) -> Self {
        Self {
            batch_size,
            stop_on_failure: true,
        }
    }

    /// Keep going through every batch whatever the children end as.
    pub fn settle_all(mut self) -> Self {
        self.stop_on_failure = false;
        self
    }
}

impl Default for FanOut {
    fn default() -> Self {
        Self::batches_of(Self::DEFAULT_BATCH_SIZE)
    }
}

/// Outcome of a fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct FanOutReport<T> {
    /// Terminal records of the children that ran, in input order.
    pub children: Vec<TaskRecord<T>>,

    /// Calls never started because an earlier batch failed.
    pub skipped: Vec<ActivityCall>,
}

impl<T> FanOutReport<T> {
    fn empty() -> Self {
        Self {
            children: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.skipped.is_empty()
            && self
                .children
                .iter()
                .all(|r| r.status == TaskStatus::Succeeded)
    }
}

impl<T: Payload> WorkflowOrchestrator<T> {
    /// Run `first`, then keep asking `next` for a follow-up call while steps
    /// succeed. Each step is a child of the one before it.
    ///
    /// Returns the terminal record of every step that ran, in order. The last
    /// one is either a step that did not succeed or one after which `next`
    /// returned `None`.
    #[instrument(skip_all, fields(first = %first.activity))]
    pub async fn sequence<F>(
        &self,
        first: ActivityCall,
        mut next: F,
    ) -> Result<Vec<TaskRecord<T>>, OrchestratorError>
    where
        F: FnMut(&TaskRecord<T>) -> Option<ActivityCall> + Send,
    {
        let mut steps = Vec::new();
        let mut record = self.run(first, None).await?;
        loop {
            let follow_up = match record.status {
                TaskStatus::Succeeded => next(&record),
                _ => None,
            };
            let previous = record.id;
            steps.push(record);
            let Some(call) = follow_up else { break };
            record = self.start_child(previous, call, None).await?.wait().await?;
        }
        info!(steps = steps.len(), "sequence finished");
        Ok(steps)
    }

    /// Run `calls` as children of `parent`, `batch_size` at a time.
    #[instrument(skip(self, calls), fields(parent = %parent, children = calls.len()))]
    pub async fn fan_out(
        &self,
        parent: TaskId,
        calls: Vec<ActivityCall>,
        options: FanOut,
    ) -> Result<FanOutReport<T>, OrchestratorError> {
        if options.batch_size == 0 {
            return Err(ValidationError::ZeroBatchSize.into());
        }

        let mut report = FanOutReport {
            children: Vec::with_capacity(calls.len()),
            skipped: Vec::new(),
        };
        let mut pending = calls.into_iter();
        loop {
            let batch: Vec<ActivityCall> = pending.by_ref().take(options.batch_size).collect();
            if batch.is_empty() {
                break;
            }

            let mut handles = Vec::with_capacity(batch.len());
            for call in batch {
                handles.push(self.start_child(parent, call, None).await?);
            }
            let mut clean = true;
            for handle in handles {
                let record = handle.wait().await?;
                clean &= record.status == TaskStatus::Succeeded;
                report.children.push(record);
            }

            if !clean && options.stop_on_failure {
                report.skipped = pending.collect();
                warn!(skipped = report.skipped.len(), "batch failed, fan-out stopped");
                break;
            }
        }
        info!(ran = report.children.len(), "fan-out finished");
        Ok(report)
    }

    /// Run `head`, derive child calls from its record, then fan them out
    /// under it. A `head` that does not succeed has no children.
    pub async fn expand<F>(
        &self,
        head: ActivityCall,
        derive: F,
        options: FanOut,
    ) -> Result<(TaskRecord<T>, FanOutReport<T>), OrchestratorError>
    where
        F: FnOnce(&TaskRecord<T>) -> Vec<ActivityCall> + Send,
    {
        let head = self.run(head, None).await?;
        if head.status != TaskStatus::Succeeded {
            return Ok((head, FanOutReport::empty()));
        }
        let calls = derive(&head);
        let report = self.fan_out(head.id, calls, options).await?;
        Ok((head, report))
    }

    /// Direct children of `parent` as currently stored.
    pub async fn children(&self, parent: TaskId) -> Result<Vec<TaskRecord<T>>, OrchestratorError> {
        Ok(self.state().children(parent).await?)
    }
}
