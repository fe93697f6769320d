//! ActivityRegistry - Handler の登録と、名前による呼び分け
//!
//! # 学習ポイント
//! - HashMap での型消去された trait object の管理
//! - Generic methods での登録と型安全性
//! - Registry 自体が `ActivityExecutor` port を実装する

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::activity::Activity;
use super::handler::{ActivityContext, DynHandler, Handler, TypedHandler};
use crate::domain::ActivityFailure;
use crate::ports::{ActivityExecutor, ActivityRequest};

/// ActivityRegistry は型付き Handler を登録・管理
///
/// ```ignore
/// let mut registry = ActivityRegistry::new();
/// registry.register::<FetchQuote, _>(FetchQuoteHandler)?;
/// let executor: Arc<dyn ActivityExecutor> = Arc::new(registry);
/// ```
#[derive(Default)]
pub struct ActivityRegistry {
    handlers: HashMap<String, Arc<dyn DynHandler>>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("handler for activity '{0}' is already registered")]
    AlreadyRegistered(String),
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register<A: Activity, H: Handler<A> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        let name = A::NAME.to_string();
        if self.handlers.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        self.handlers
            .insert(name, Arc::new(TypedHandler::<A, H>::new(handler)));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[async_trait]
impl ActivityExecutor for ActivityRegistry {
    async fn execute(&self, request: ActivityRequest) -> Result<serde_json::Value, ActivityFailure> {
        let handler = self.get(request.activity.as_str()).ok_or_else(|| {
            ActivityFailure::unclassified(format!("no handler for activity '{}'", request.activity))
        })?;
        let ctx = ActivityContext::from(&request);
        handler.handle_dyn(request.args, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActivityName, FailureKind, TaskId};
    use crate::typed::activity::fixtures::{FetchQuote, ScrapeUrls};
    use crate::typed::handler::fixtures::{FetchQuoteHandler, ScrapeUrlsHandler};
    use serde_json::json;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn request(activity: &str, args: serde_json::Value) -> ActivityRequest {
        ActivityRequest {
            task_id: TaskId::from_ulid(ulid::Ulid::new()),
            activity: ActivityName::new(activity),
            args,
            timeout: Duration::from_secs(5),
            attempt: 1,
            abandon: CancellationToken::new(),
            heartbeat_timeout: None,
            heartbeat: crate::ports::Heartbeat::detached(),
        }
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = ActivityRegistry::new();
        registry
            .register::<FetchQuote, _>(FetchQuoteHandler)
            .unwrap();

        assert!(registry.get(FetchQuote::NAME).is_some());
        assert!(registry.get(ScrapeUrls::NAME).is_none());
        assert_eq!(registry.registered_names(), vec![FetchQuote::NAME.to_string()]);
    }

    #[test]
    fn test_double_registration() {
        let mut registry = ActivityRegistry::new();
        registry
            .register::<FetchQuote, _>(FetchQuoteHandler)
            .unwrap();
        let result = registry.register::<FetchQuote, _>(FetchQuoteHandler);
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(_))));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn executes_by_name() {
        let mut registry = ActivityRegistry::new();
        registry
            .register::<FetchQuote, _>(FetchQuoteHandler)
            .unwrap();
        registry
            .register::<ScrapeUrls, _>(ScrapeUrlsHandler)
            .unwrap();

        let quote = registry
            .execute(request(FetchQuote::NAME, json!({"symbol": "MSFT"})))
            .await
            .unwrap();
        assert_eq!(quote["symbol"], "MSFT");

        let pages = registry
            .execute(request(ScrapeUrls::NAME, json!({"urls": ["https://a.example"]})))
            .await
            .unwrap();
        assert_eq!(pages, json!(["# https://a.example"]));
    }

    #[tokio::test]
    async fn unknown_activity_is_unclassified() {
        let registry = ActivityRegistry::new();
        let err = registry
            .execute(request("missing.v1", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Unclassified);
        assert!(err.to_string().contains("missing.v1"));
    }
}
