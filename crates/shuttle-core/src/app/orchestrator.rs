//! WorkflowOrchestrator - タスクのライフサイクルを駆動する
//!
//! # フロー
//! 1. StateService::create() で Created のレコードを確保
//! 2. Running へ遷移して proxy 経由で activity を 1 回呼ぶ
//! 3. 結果に応じて Succeeded / RetryScheduled / TimedOut / Failed へ遷移
//! 4. RetryScheduled なら `next_attempt_at` まで待って 2 に戻る
//!
//! すべての状態は StateService にあるので、プロセスが落ちても
//! `resume()` で続きから再開できる。
//!
//! 複数の activity をつなぐワークフローは `workflow` モジュールを参照。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::proxy::{ActivityProxy, CallError};
use super::retry::{RetryDecision, RetryPolicy};
use super::status::StatusCounts;
use crate::domain::{
    ActivityCall, ActivityFailure, FailureReason, Payload, StateError, TaskId, TaskRecord,
    TaskStatus, Transition, ValidationError,
};
use crate::ports::{Clock, StateService};
use crate::typed::Activity;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("task {0} is already being driven")]
    AlreadyRunning(TaskId),

    #[error("task {id} already finished as {status}")]
    AlreadyFinished { id: TaskId, status: TaskStatus },

    #[error("orchestration for task aborted: {0}")]
    Join(String),
}

/// Handle to a task being driven in the background.
///
/// Dropping it does not stop the task.
pub struct TaskHandle<T> {
    id: TaskId,
    join: JoinHandle<Result<TaskRecord<T>, OrchestratorError>>,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Wait until the task reaches a terminal status.
    pub async fn wait(self) -> Result<TaskRecord<T>, OrchestratorError> {
        self.join
            .await
            .map_err(|e| OrchestratorError::Join(e.to_string()))?
    }

    /// Let the task run unobserved; its progress stays visible through the State Service.
    pub fn detach(self) -> TaskId {
        self.id
    }
}

/// Drives tasks from `Created` to a terminal status through an [`ActivityProxy`].
///
/// Cloning is cheap and every clone drives the same set of tasks.
pub struct WorkflowOrchestrator<T: Payload> {
    inner: Arc<Inner<T>>,
}

impl<T: Payload> Clone for WorkflowOrchestrator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T: Payload> {
    state: Arc<dyn StateService<T>>,
    proxy: ActivityProxy,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    inflight: Mutex<HashMap<TaskId, DriverSlot>>,
}

/// A live driver: how to stop it and where it announces its final status.
#[derive(Clone)]
struct DriverSlot {
    cancel: CancellationToken,
    settled: watch::Receiver<Option<TaskStatus>>,
}

/// Unregisters a driver when its future ends, by return or by panic.
struct InflightGuard<T: Payload> {
    inner: Arc<Inner<T>>,
    id: TaskId,
}

impl<T: Payload> Drop for InflightGuard<T> {
    fn drop(&mut self) {
        self.inner.inflight().remove(&self.id);
    }
}

impl<T: Payload> WorkflowOrchestrator<T> {
    pub fn new(
        state: Arc<dyn StateService<T>>,
        proxy: ActivityProxy,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state,
                proxy,
                policy,
                clock,
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn state(&self) -> &Arc<dyn StateService<T>> {
        &self.inner.state
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    /// Create a task for `call` and drive it in the background.
    ///
    /// `timeout` overrides the proxy's default start-to-close budget.
    pub async fn start(
        &self,
        call: ActivityCall,
        timeout: Option<Duration>,
    ) -> Result<TaskHandle<T>, OrchestratorError> {
        self.start_linked(None, call, timeout).await
    }

    /// Like [`start`](Self::start), recording `parent` as the workflow step
    /// that spawned the new task.
    pub async fn start_child(
        &self,
        parent: TaskId,
        call: ActivityCall,
        timeout: Option<Duration>,
    ) -> Result<TaskHandle<T>, OrchestratorError> {
        self.start_linked(Some(parent), call, timeout).await
    }

    #[instrument(skip_all, fields(activity = %call.activity))]
    async fn start_linked(
        &self,
        parent: Option<TaskId>,
        mut call: ActivityCall,
        timeout: Option<Duration>,
    ) -> Result<TaskHandle<T>, OrchestratorError> {
        if timeout.is_some() {
            call.timeout = timeout;
        }
        let record = self.inner.state.create_with_parent(call, parent).await?;
        info!(task_id = %record.id, parent = ?parent, "task created");
        self.spawn(record.id)
    }

    /// Start and wait for the terminal record.
    pub async fn run(
        &self,
        call: ActivityCall,
        timeout: Option<Duration>,
    ) -> Result<TaskRecord<T>, OrchestratorError> {
        self.start(call, timeout).await?.wait().await
    }

    /// Typed variant of [`start`](Self::start).
    pub async fn start_activity<A: Activity>(
        &self,
        input: &A,
        timeout: Option<Duration>,
    ) -> Result<TaskHandle<T>, OrchestratorError> {
        self.start(input.to_call()?, timeout).await
    }

    /// Pick up an existing task from wherever its record says it is.
    ///
    /// Terminal tasks resolve immediately without invoking anything.
    pub async fn resume(&self, id: TaskId) -> Result<TaskHandle<T>, OrchestratorError> {
        self.inner.state.get(id).await?;
        self.spawn(id)
    }

    /// Resume every non-terminal task not already driven by this orchestrator.
    pub async fn resume_unfinished(&self) -> Result<Vec<TaskHandle<T>>, OrchestratorError> {
        let mut handles = Vec::new();
        for record in self.inner.state.unfinished().await? {
            match self.spawn(record.id) {
                Ok(handle) => handles.push(handle),
                Err(OrchestratorError::AlreadyRunning(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        info!(count = handles.len(), "resumed unfinished tasks");
        Ok(handles)
    }

    /// Cancel a task and report the status it settled in.
    ///
    /// A task driven here is interrupted at its next await point (in-flight
    /// call or retry wait) and ends `Failed`; this waits for that to happen.
    /// A call whose success was already being recorded when the signal
    /// arrived still ends `Succeeded`, and that is what gets returned. A task
    /// nobody drives is failed directly.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: TaskId) -> Result<TaskStatus, OrchestratorError> {
        let slot = self.inner.inflight().get(&id).cloned();
        if let Some(mut slot) = slot {
            slot.cancel.cancel();
            info!("cancellation requested");
            let settled = slot
                .settled
                .wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|status| *status);
            if let Some(status) = settled {
                info!(%status, "driven task settled");
                return Ok(status);
            }
            // driver が決着を記録せずに止まった: 以下で直接 Failed にする
            warn!("driver stopped before settling");
        }

        let record = self.inner.state.get(id).await?;
        if record.status.is_terminal() {
            return Err(OrchestratorError::AlreadyFinished {
                id,
                status: record.status,
            });
        }
        let record = self
            .inner
            .state
            .transition(
                id,
                Transition::to(TaskStatus::Failed).with_failure(FailureReason::Cancelled),
            )
            .await?;
        info!("idle task cancelled");
        Ok(record.status)
    }

    pub async fn counts(&self) -> Result<StatusCounts, OrchestratorError> {
        let records = self.inner.state.list().await?;
        Ok(StatusCounts::tally(&records))
    }

    fn spawn(&self, id: TaskId) -> Result<TaskHandle<T>, OrchestratorError> {
        let cancel = CancellationToken::new();
        let (announce, settled) = watch::channel(None);
        {
            let mut inflight = self.inner.inflight();
            if inflight.contains_key(&id) {
                return Err(OrchestratorError::AlreadyRunning(id));
            }
            inflight.insert(
                id,
                DriverSlot {
                    cancel: cancel.clone(),
                    settled,
                },
            );
        }

        let guard = InflightGuard {
            inner: Arc::clone(&self.inner),
            id,
        };
        let join = tokio::spawn(async move {
            let result = guard.inner.drive(id, &cancel).await;
            if let Ok(record) = &result {
                announce.send_replace(Some(record.status));
            }
            drop(guard);
            result
        });
        Ok(TaskHandle { id, join })
    }
}

impl<T: Payload> Inner<T> {
    fn inflight(&self) -> MutexGuard<'_, HashMap<TaskId, DriverSlot>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[instrument(skip_all, fields(task_id = %id))]
    async fn drive(
        &self,
        id: TaskId,
        cancel: &CancellationToken,
    ) -> Result<TaskRecord<T>, OrchestratorError> {
        let mut record = self.state.get(id).await?;

        loop {
            if record.status.is_terminal() {
                info!(status = %record.status, attempts = record.attempts, "task finished");
                return Ok(record);
            }
            if cancel.is_cancelled() {
                record = self.fail(id, FailureReason::Cancelled).await?;
                continue;
            }

            record = match record.status {
                TaskStatus::Created => match record.call.validate() {
                    Err(e) => {
                        warn!(error = %e, "rejecting malformed call");
                        self.fail(
                            id,
                            FailureReason::InvalidInput {
                                message: e.to_string(),
                            },
                        )
                        .await?
                    }
                    Ok(()) => self.attempt(id, cancel).await?,
                },
                // 結果が記録される前にプロセスが止まった
                TaskStatus::Running => {
                    warn!(attempts = record.attempts, "found running task without outcome");
                    let decision = self.policy.decide_interrupted(record.attempts);
                    self.settle(id, decision, FailureReason::Interrupted).await?
                }
                TaskStatus::RetryScheduled => {
                    if self.wait_until(record.next_attempt_at, cancel).await {
                        self.attempt(id, cancel).await?
                    } else {
                        self.fail(id, FailureReason::Cancelled).await?
                    }
                }
                TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::TimedOut => record,
            };
        }
    }

    /// Enter `Running` and make exactly one proxy invocation.
    async fn attempt(
        &self,
        id: TaskId,
        cancel: &CancellationToken,
    ) -> Result<TaskRecord<T>, OrchestratorError> {
        let record = self
            .state
            .transition(id, Transition::to(TaskStatus::Running))
            .await?;
        info!(attempt = record.attempts, "attempt started");

        let outcome = self
            .proxy
            .invoke(id, &record.call, record.attempts, cancel)
            .await;
        let failure = match outcome {
            Ok(value) => match serde_json::from_value::<T>(value) {
                Ok(result) => {
                    let record = self.state.transition(id, Transition::succeeded(result)).await?;
                    return Ok(record);
                }
                Err(e) => ActivityFailure::unclassified(format!("undecodable result: {e}")),
            },
            Err(CallError::Cancelled) => return self.fail(id, FailureReason::Cancelled).await,
            Err(CallError::Failed(failure)) => failure,
        };

        let decision = self.policy.decide(&failure, record.attempts);
        debug!(kind = %failure.kind(), ?decision, "attempt failed");
        self.settle(id, decision, failure.into()).await
    }

    /// Record a failed attempt according to `decision`.
    async fn settle(
        &self,
        id: TaskId,
        decision: RetryDecision,
        reason: FailureReason,
    ) -> Result<TaskRecord<T>, OrchestratorError> {
        let transition = match decision {
            RetryDecision::RetryAfter(delay) => {
                let at = TimeDelta::from_std(delay)
                    .ok()
                    .and_then(|d| self.clock.now().checked_add_signed(d))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                info!(?delay, %reason, "retry scheduled");
                Transition::to(TaskStatus::RetryScheduled).retry_at(at)
            }
            RetryDecision::TimeOut => {
                warn!(%reason, "task timed out");
                Transition::to(TaskStatus::TimedOut)
            }
            RetryDecision::Fail => {
                warn!(%reason, "task failed");
                Transition::to(TaskStatus::Failed)
            }
        };
        Ok(self.state.transition(id, transition.with_failure(reason)).await?)
    }

    async fn fail(&self, id: TaskId, reason: FailureReason) -> Result<TaskRecord<T>, OrchestratorError> {
        warn!(%reason, "task failed");
        Ok(self
            .state
            .transition(id, Transition::to(TaskStatus::Failed).with_failure(reason))
            .await?)
    }

    /// Sleep until `at`. Returns `false` if cancelled first.
    async fn wait_until(&self, at: Option<DateTime<Utc>>, cancel: &CancellationToken) -> bool {
        let remaining = at
            .and_then(|at| (at - self.clock.now()).to_std().ok())
            .unwrap_or(Duration::ZERO);
        debug!(?remaining, "waiting for next attempt");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(remaining) => true,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::app::proxy::StartToClose;
    use crate::impls::InMemoryStateService;
    use crate::ports::{ActivityExecutor, ActivityRequest, FixedClock};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    pub type Step = (Duration, Result<Value, ActivityFailure>);

    /// Replays scripted answers per activity name.
    #[derive(Default)]
    pub struct Script {
        steps: Mutex<HashMap<String, VecDeque<Step>>>,
        calls: AtomicU32,
    }

    impl Script {
        pub fn new(activity: &str, steps: Vec<Step>) -> Arc<Self> {
            let script = Self::default();
            script.add(activity, steps);
            Arc::new(script)
        }

        pub fn add(&self, activity: &str, steps: Vec<Step>) {
            self.steps
                .lock()
                .unwrap()
                .insert(activity.to_string(), steps.into());
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ActivityExecutor for Script {
        async fn execute(&self, request: ActivityRequest) -> Result<Value, ActivityFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self
                .steps
                .lock()
                .unwrap()
                .get_mut(request.activity.as_str())
                .and_then(|q| q.pop_front());
            let Some((delay, answer)) = step else {
                return Err(ActivityFailure::unclassified("script exhausted"));
            };
            tokio::time::sleep(delay).await;
            answer
        }
    }

    pub fn ok(v: Value) -> Step {
        (Duration::ZERO, Ok(v))
    }

    pub fn rate_limited(secs: i64) -> Step {
        (Duration::ZERO, Err(ActivityFailure::rate_limited(secs).unwrap()))
    }

    pub fn clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ))
    }

    pub fn orchestrator_with<T: Payload>(
        executor: Arc<dyn ActivityExecutor>,
        state: Arc<dyn StateService<T>>,
        policy: RetryPolicy,
    ) -> WorkflowOrchestrator<T> {
        WorkflowOrchestrator::new(
            state,
            ActivityProxy::new(executor, StartToClose::DEFAULT),
            policy,
            clock(),
        )
    }

    pub fn orchestrator<T: Payload>(
        executor: Arc<dyn ActivityExecutor>,
        state: Arc<dyn StateService<T>>,
        max_retries: u32,
    ) -> WorkflowOrchestrator<T> {
        let policy = RetryPolicy {
            max_retries,
            ..RetryPolicy::default()
        };
        orchestrator_with(executor, state, policy)
    }

    pub fn fresh_state<T: Payload>() -> Arc<dyn StateService<T>> {
        Arc::new(InMemoryStateService::<T>::with_clock(clock()))
    }

    pub fn statuses<T>(record: &TaskRecord<T>) -> Vec<TaskStatus> {
        record.history.iter().map(|c| c.to).collect()
    }
}
