//! ActivityExecutor port - 実際の作業（fetch, scrape など）を行う外部コラボレータ
//!
//! Executor は activity 名で呼び分けられ、結果または `ActivityFailure` を返します。

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::domain::{ActivityFailure, ActivityName, TaskId};

/// Everything an executor gets for one invocation.
#[derive(Debug, Clone)]
pub struct ActivityRequest {
    pub task_id: TaskId,
    pub activity: ActivityName,
    pub args: serde_json::Value,

    /// The start-to-close budget the proxy enforces for this call.
    pub timeout: Duration,

    /// 1-based attempt number of the owning task.
    pub attempt: u32,

    /// Cancelled when the proxy abandons the call (timeout or caller cancel).
    /// Executors that spawn their own work should watch it.
    pub abandon: CancellationToken,

    /// Heartbeat budget for this call, if any. When set, the executor has to
    /// call `heartbeat.beat()` at least this often or the call is abandoned.
    pub heartbeat_timeout: Option<Duration>,
    pub heartbeat: Heartbeat,
}

/// Liveness signal a long-running executor sends back to the proxy.
///
/// Beating is cheap and never fails, even when nobody is watching.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    tx: Arc<watch::Sender<u64>>,
}

impl Heartbeat {
    /// A heartbeat plus the receiver the proxy watches.
    pub fn channel() -> (Self, watch::Receiver<u64>) {
        let (tx, rx) = watch::channel(0);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// A heartbeat nobody observes.
    pub fn detached() -> Self {
        Self::channel().0
    }

    pub fn beat(&self) {
        self.tx.send_modify(|n| *n = n.wrapping_add(1));
    }
}

/// ActivityExecutor performs the actual unit of work.
///
/// # 契約
/// - 内部リトライは自由だが、proxy の start-to-close 予算内に収めること
/// - rate limit は `ActivityFailure::RateLimitExceeded` で報告する
#[async_trait]
pub trait ActivityExecutor: Send + Sync {
    async fn execute(&self, request: ActivityRequest) -> Result<serde_json::Value, ActivityFailure>;
}
