//! Handler trait - Activity を実行する Handler の定義
//!
//! # 学習ポイント
//! - ジェネリック trait (Handler<A>)
//! - Object-safe trait (DynHandler)
//! - Type erasure パターン (TypedHandler<A, H> → DynHandler)

use async_trait::async_trait;
use std::marker::PhantomData;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::activity::Activity;
use crate::domain::{ActivityFailure, TaskId};
use crate::ports::{ActivityRequest, Heartbeat};

/// Per-invocation context handed to handlers.
#[derive(Debug, Clone)]
pub struct ActivityContext {
    pub task_id: TaskId,
    pub attempt: u32,
    pub timeout: Duration,
    pub abandon: CancellationToken,

    /// `heartbeat.beat()` を `heartbeat_timeout` 以内の間隔で呼ぶこと
    pub heartbeat_timeout: Option<Duration>,
    pub heartbeat: Heartbeat,
}

impl From<&ActivityRequest> for ActivityContext {
    fn from(request: &ActivityRequest) -> Self {
        Self {
            task_id: request.task_id,
            attempt: request.attempt,
            timeout: request.timeout,
            abandon: request.abandon.clone(),
            heartbeat_timeout: request.heartbeat_timeout,
            heartbeat: request.heartbeat.clone(),
        }
    }
}

/// Handler は Activity を実行して `A::Output` を返す
///
/// # ジェネリクスによる型安全性
/// - `Handler<FetchQuote>` は `FetchQuote` しか受け取れない
/// - コンパイル時に Activity と Handler の対応が保証される
#[async_trait]
pub trait Handler<A: Activity>: Send + Sync {
    async fn handle(&self, input: A, ctx: ActivityContext) -> Result<A::Output, ActivityFailure>;
}

/// DynHandler は object-safe な Handler の抽象化
///
/// `HashMap<String, Arc<dyn DynHandler>>` に格納するための型消去層。
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(
        &self,
        args: serde_json::Value,
        ctx: ActivityContext,
    ) -> Result<serde_json::Value, ActivityFailure>;

    fn activity_name(&self) -> &'static str;
}

pub struct TypedHandler<A: Activity, H: Handler<A>> {
    handler: H,
    _marker: PhantomData<A>,
}

impl<A: Activity, H: Handler<A>> TypedHandler<A, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<A: Activity, H: Handler<A>> DynHandler for TypedHandler<A, H> {
    async fn handle_dyn(
        &self,
        args: serde_json::Value,
        ctx: ActivityContext,
    ) -> Result<serde_json::Value, ActivityFailure> {
        let input: A = serde_json::from_value(args)
            .map_err(|e| ActivityFailure::unclassified(format!("json decode: {e}")))?;
        let output = self.handler.handle(input, ctx).await?;
        serde_json::to_value(output)
            .map_err(|e| ActivityFailure::unclassified(format!("json encode: {e}")))
    }

    fn activity_name(&self) -> &'static str {
        A::NAME
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{FetchQuoteHandler, context};
    use super::*;
    use crate::domain::FailureKind;
    use crate::typed::activity::fixtures::FetchQuote;
    use serde_json::json;

    #[tokio::test]
    async fn typed_handler_round_trips_json() {
        let typed = TypedHandler::<FetchQuote, _>::new(FetchQuoteHandler);
        let out = typed
            .handle_dyn(json!({"symbol": "AAPL"}), context())
            .await
            .unwrap();
        assert_eq!(out, json!({"symbol": "AAPL", "price": 189.5}));
        assert_eq!(typed.activity_name(), "ticker.fetch_quote.v1");
    }

    #[tokio::test]
    async fn undecodable_args_are_unclassified() {
        let typed = TypedHandler::<FetchQuote, _>::new(FetchQuoteHandler);
        let err = typed
            .handle_dyn(json!({"ticker": 1}), context())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Unclassified);
    }
}
