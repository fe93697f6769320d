//! shuttle-core
//!
//! Durable orchestration of rate-limited activity calls.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, status, failure, task record, errors）
//! - **ports**: 抽象化レイヤー（StateService, ActivityExecutor, Clock, IdGenerator）
//! - **app**: アプリケーションロジック（builder, orchestrator, proxy, retry, status, workflow）
//! - **typed**: 型付き Activity API（Activity trait, Handler trait, ActivityRegistry）
//! - **impls**: 実装（InMemoryStateService）
//! - **config**: 環境変数からの設定
//!
//! ログは `tracing` で出すだけで、subscriber の初期化はバイナリ側の責務。

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

pub use app::{FanOut, OrchestratorBuilder, OrchestratorError, TaskHandle, WorkflowOrchestrator};
pub use config::ShuttleConfig;
