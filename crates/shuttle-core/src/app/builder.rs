//! OrchestratorBuilder - orchestrator の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - ports のデフォルト実装の差し込み

use std::sync::Arc;

use tracing::debug;

use super::orchestrator::WorkflowOrchestrator;
use super::proxy::{ActivityProxy, StartToClose};
use super::retry::RetryPolicy;
use crate::config::{ConfigError, ShuttleConfig};
use crate::domain::Payload;
use crate::impls::InMemoryStateService;
use crate::ports::{ActivityExecutor, Clock, StateService, SystemClock};
use crate::typed::{Activity, ActivityRegistry, Handler, RegistryError};

/// OrchestratorBuilder は `WorkflowOrchestrator<T>` を構築
///
/// # 使用例
/// ```ignore
/// let orchestrator = OrchestratorBuilder::<Quote>::new()
///     .register::<FetchQuote, _>(FetchQuoteHandler)?
///     .expect_activities(&["ticker.fetch_quote.v1"])
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - expect_activities() で期待される activity 名を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - 不足があれば BuildError を返す
///
/// 独自の executor を `executor()` で渡した場合、名前の検証はその executor の責務。
pub struct OrchestratorBuilder<T: Payload> {
    registry: ActivityRegistry,
    executor: Option<Arc<dyn ActivityExecutor>>,
    state: Option<Arc<dyn StateService<T>>>,
    clock: Option<Arc<dyn Clock>>,
    config: ShuttleConfig,
    expected_activities: Option<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing activities: {0:?}. These activities were expected but not registered.")]
    MissingActivities(Vec<String>),

    #[error("no activity executor: register a handler or supply an executor")]
    NoExecutor,

    #[error("registered handlers and a custom executor cannot be combined")]
    ConflictingExecutors,

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl<T: Payload> OrchestratorBuilder<T> {
    pub fn new() -> Self {
        Self {
            registry: ActivityRegistry::new(),
            executor: None,
            state: None,
            clock: None,
            config: ShuttleConfig::default(),
            expected_activities: None,
        }
    }

    /// Handler を登録
    pub fn register<A: Activity, H: Handler<A> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, BuildError> {
        self.registry.register::<A, H>(handler)?;
        Ok(self)
    }

    /// Use an external executor instead of registered handlers.
    pub fn executor(mut self, executor: Arc<dyn ActivityExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Defaults to a fresh [`InMemoryStateService`].
    pub fn state(mut self, state: Arc<dyn StateService<T>>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn config(mut self, config: ShuttleConfig) -> Self {
        self.config = config;
        self
    }

    /// 期待される activity 名のリストを設定
    pub fn expect_activities(mut self, names: &[&str]) -> Self {
        self.expected_activities = Some(names.iter().map(|s| s.to_string()).collect());
        self
    }

    /// # 検証
    /// - config が妥当か
    /// - executor がちょうど 1 つ決まるか
    /// - expect_activities() の名前が全て登録されているか
    pub fn build(self) -> Result<WorkflowOrchestrator<T>, BuildError> {
        self.config.validate()?;

        let executor: Arc<dyn ActivityExecutor> = match self.executor {
            Some(_) if !self.registry.is_empty() => return Err(BuildError::ConflictingExecutors),
            Some(executor) => executor,
            None if self.registry.is_empty() => return Err(BuildError::NoExecutor),
            None => {
                if let Some(expected) = &self.expected_activities {
                    let registered = self.registry.registered_names();
                    let missing: Vec<String> = expected
                        .iter()
                        .filter(|name| !registered.contains(name))
                        .cloned()
                        .collect();
                    if !missing.is_empty() {
                        return Err(BuildError::MissingActivities(missing));
                    }
                }
                debug!(activities = ?self.registry.registered_names(), "using handler registry");
                Arc::new(self.registry)
            }
        };

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let state = self
            .state
            .unwrap_or_else(|| Arc::new(InMemoryStateService::<T>::with_clock(clock.clone())));
        let budget = StartToClose::new(self.config.start_to_close)
            .map_err(|_| ConfigError::ZeroStartToClose)?;

        Ok(WorkflowOrchestrator::new(
            state,
            ActivityProxy::new(executor, budget).with_heartbeat(self.config.heartbeat_timeout),
            RetryPolicy::from_config(&self.config),
            clock,
        ))
    }
}

impl<T: Payload> Default for OrchestratorBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}
