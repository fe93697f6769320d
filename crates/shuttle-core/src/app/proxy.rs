//! ActivityProxy - executor 呼び出しに start-to-close 予算を課す
//!
//! Proxy はステートレスでリトライしない。リトライ判断はすべて orchestrator 側。
//! heartbeat 予算が設定されていれば、executor からの beat が途絶えた時点でも打ち切る。

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::{ActivityCall, ActivityFailure, TaskId, ValidationError};
use crate::ports::{ActivityExecutor, ActivityRequest, Heartbeat};

/// A start-to-close budget, guaranteed non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StartToClose(Duration);

impl StartToClose {
    pub const DEFAULT: StartToClose = StartToClose(Duration::from_secs(5 * 60));

    pub fn new(budget: Duration) -> Result<Self, ValidationError> {
        if budget.is_zero() {
            return Err(ValidationError::ZeroTimeout);
        }
        Ok(Self(budget))
    }

    pub fn get(self) -> Duration {
        self.0
    }
}

impl Default for StartToClose {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Why a proxied call produced no result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error(transparent)]
    Failed(#[from] ActivityFailure),

    /// The caller cancelled; the executor was told to abandon the work.
    #[error("activity call cancelled")]
    Cancelled,
}

/// Typed façade over an [`ActivityExecutor`].
#[derive(Clone)]
pub struct ActivityProxy {
    executor: Arc<dyn ActivityExecutor>,
    default_timeout: StartToClose,
    default_heartbeat: Option<Duration>,
}

impl ActivityProxy {
    pub fn new(executor: Arc<dyn ActivityExecutor>, default_timeout: StartToClose) -> Self {
        Self {
            executor,
            default_timeout,
            default_heartbeat: None,
        }
    }

    /// Heartbeat budget for calls that do not set their own.
    pub fn with_heartbeat(mut self, heartbeat_timeout: Option<Duration>) -> Self {
        self.default_heartbeat = heartbeat_timeout;
        self
    }

    pub fn default_timeout(&self) -> StartToClose {
        self.default_timeout
    }

    /// Heartbeat budget for `call`, if either the call or the proxy sets one.
    pub fn heartbeat_for(&self, call: &ActivityCall) -> Result<Option<Duration>, ValidationError> {
        match call.heartbeat_timeout.or(self.default_heartbeat) {
            Some(limit) if limit.is_zero() => Err(ValidationError::ZeroHeartbeat),
            limit => Ok(limit),
        }
    }

    /// Budget for `call`: its own override if valid, otherwise the default.
    pub fn budget_for(&self, call: &ActivityCall) -> Result<StartToClose, ValidationError> {
        call.timeout
            .map(StartToClose::new)
            .unwrap_or(Ok(self.default_timeout))
    }

    /// Invoke `call` once.
    ///
    /// The budget starts when this is called. When it elapses, when the
    /// heartbeat budget passes without a beat, or when `cancel` fires first,
    /// the executor future is dropped and its `abandon` token is cancelled;
    /// nothing it produced afterwards is used.
    pub async fn invoke(
        &self,
        task_id: TaskId,
        call: &ActivityCall,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, CallError> {
        let budget = self
            .budget_for(call)
            .map_err(ActivityFailure::unclassified)?
            .get();
        let heartbeat_timeout = self
            .heartbeat_for(call)
            .map_err(ActivityFailure::unclassified)?;
        let abandon = cancel.child_token();
        let (heartbeat, beats) = Heartbeat::channel();
        let request = ActivityRequest {
            task_id,
            activity: call.activity.clone(),
            args: call.args.clone(),
            timeout: budget,
            attempt,
            abandon: abandon.clone(),
            heartbeat_timeout,
            heartbeat,
        };

        debug!(task_id = %task_id, activity = %call.activity, attempt, ?budget, ?heartbeat_timeout, "invoking activity");
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                abandon.cancel();
                warn!(task_id = %task_id, activity = %call.activity, attempt, "activity call cancelled");
                return Err(CallError::Cancelled);
            }
            limit = heartbeat_lapse(heartbeat_timeout, beats) => {
                abandon.cancel();
                warn!(task_id = %task_id, activity = %call.activity, attempt, ?limit, "heartbeat timeout elapsed");
                return Err(ActivityFailure::heartbeat_missed(limit).into());
            }
            res = tokio::time::timeout(budget, self.executor.execute(request)) => res,
        };

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(failure)) => {
                debug!(task_id = %task_id, activity = %call.activity, attempt, kind = %failure.kind(), "activity failed");
                Err(failure.into())
            }
            Err(_elapsed) => {
                abandon.cancel();
                warn!(task_id = %task_id, activity = %call.activity, attempt, ?budget, "start-to-close timeout elapsed");
                Err(ActivityFailure::timed_out(budget).into())
            }
        }
    }
}

/// Resolves with `limit` once `beats` has been silent for that long.
/// Never resolves without a limit.
async fn heartbeat_lapse(limit: Option<Duration>, mut beats: watch::Receiver<u64>) -> Duration {
    let Some(limit) = limit else {
        return pending().await;
    };
    loop {
        match tokio::time::timeout(limit, beats.changed()).await {
            Ok(Ok(())) => continue,
            // executor が Heartbeat を捨てた: 以降は start-to-close だけが効く
            Ok(Err(_)) => return pending().await,
            Err(_) => return limit,
        }
    }
}
