//! InMemoryStateService - 開発用・テスト用の State Service
//!
//! # 実装詳細
//! - `RwLock<HashMap<TaskId, Arc<Mutex<TaskRecord<T>>>>>` で管理
//! - map のロックは lookup / insert の間だけ保持する
//! - 遷移はレコードごとの Mutex で直列化（異なる id は並行に進む）
//!
//! Records live as long as the service instance; sharing one instance
//! between orchestrators stands in for a durable store in tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::domain::{ActivityCall, Payload, StateError, TaskId, TaskRecord, Transition};
use crate::ports::{Clock, IdGenerator, StateService, SystemClock, UlidGenerator};

pub struct InMemoryStateService<T> {
    records: RwLock<HashMap<TaskId, Arc<Mutex<TaskRecord<T>>>>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl<T: Payload> InMemoryStateService<T> {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Timestamps and id prefixes follow `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self {
            records: RwLock::new(HashMap::new()),
            clock,
            ids,
        }
    }

    async fn slot(&self, id: TaskId) -> Result<Arc<Mutex<TaskRecord<T>>>, StateError> {
        self.records
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StateError::NotFound(id))
    }
}

impl<T: Payload> Default for InMemoryStateService<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Payload> StateService<T> for InMemoryStateService<T> {
    async fn create_with_parent(
        &self,
        call: ActivityCall,
        parent: Option<TaskId>,
    ) -> Result<TaskRecord<T>, StateError> {
        let mut records = self.records.write().await;
        if let Some(missing) = parent.filter(|p| !records.contains_key(p)) {
            return Err(StateError::NotFound(missing));
        }
        let mut id = self.ids.generate_task_id();
        while records.contains_key(&id) {
            id = self.ids.generate_task_id();
        }
        let mut record = TaskRecord::new(id, call, self.clock.now());
        record.parent = parent;
        records.insert(id, Arc::new(Mutex::new(record.clone())));
        debug!(task_id = %id, parent = ?parent, activity = %record.call.activity, "task created");
        Ok(record)
    }

    async fn get(&self, id: TaskId) -> Result<TaskRecord<T>, StateError> {
        let slot = self.slot(id).await?;
        let record = slot.lock().await;
        Ok(record.clone())
    }

    async fn transition(&self, id: TaskId, transition: Transition<T>) -> Result<TaskRecord<T>, StateError> {
        let slot = self.slot(id).await?;
        let mut record = slot.lock().await;
        let from = record.status;
        let to = transition.status;
        record.apply(transition, self.clock.now())?;
        debug!(task_id = %id, %from, %to, attempts = record.attempts, "status transition");
        Ok(record.clone())
    }

    async fn list(&self) -> Result<Vec<TaskRecord<T>>, StateError> {
        let slots: Vec<_> = self.records.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            out.push(slot.lock().await.clone());
        }
        // ULID は時刻順なので id ソート = 作成順
        out.sort_by_key(|r| r.id);
        Ok(out)
    }
}
