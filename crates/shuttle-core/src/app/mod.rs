//! App - アプリケーション層
//!
//! ports を組み合わせてタスクのオーケストレーションを実装します。
//!
//! # 主要コンポーネント
//! - **OrchestratorBuilder**: 構築とワイヤリング（fail-fast 検証つき）
//! - **WorkflowOrchestrator**: Created から終端状態までタスクを駆動
//! - **ActivityProxy**: executor 呼び出しに start-to-close 予算を課す
//! - **RetryPolicy**: 失敗ごとにリトライするかどうかを決める
//! - **workflow**: sequence / fan-out で複数の activity をつなぐ
//! - **StatusCounts**: 状態ごとの件数

pub mod builder;
pub mod orchestrator;
pub mod proxy;
pub mod retry;
pub mod status;
pub mod workflow;

pub use self::builder::{BuildError, OrchestratorBuilder};
pub use self::orchestrator::{OrchestratorError, TaskHandle, WorkflowOrchestrator};
pub use self::proxy::{ActivityProxy, CallError, StartToClose};
pub use self::retry::{RetryDecision, RetryPolicy};
pub use self::status::StatusCounts;
pub use self::workflow::{FanOut, FanOutReport};
