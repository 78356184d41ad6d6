use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use taskbeat_core::{ExecutionLog, LogPatch, Task, TaskStatus, TaskStore, TimestampPatch};

#[derive(Default)]
struct Inner {
    tasks: HashMap<Uuid, Task>,
    logs: Vec<ExecutionLog>,
}

/// In-memory `TaskStore` used by tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_task(&self, task: Task) {
        self.inner.lock().await.tasks.insert(task.id, task);
    }

    /// All log rows for a task, oldest first.
    pub async fn logs_for(&self, task_id: Uuid) -> Vec<ExecutionLog> {
        self.inner
            .lock()
            .await
            .logs
            .iter()
            .filter(|l| l.task_id == task_id)
            .cloned()
            .collect()
    }

    pub async fn task(&self, id: Uuid) -> Option<Task> {
        self.inner.lock().await.tasks.get(&id).cloned()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn load_active_tasks(&self) -> Result<Vec<Task>> {
        Ok(self
            .inner
            .lock()
            .await
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Active)
            .cloned()
            .collect())
    }

    async fn append_log(&self, entry: &ExecutionLog) -> Result<()> {
        self.inner.lock().await.logs.push(entry.clone());
        Ok(())
    }

    async fn update_log(&self, id: Uuid, patch: LogPatch) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let log = inner
            .logs
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| anyhow!("execution log {id} not found"))?;
        patch.apply(log);
        Ok(())
    }

    async fn get_log(&self, id: Uuid) -> Result<Option<ExecutionLog>> {
        Ok(self
            .inner
            .lock()
            .await
            .logs
            .iter()
            .find(|l| l.id == id)
            .cloned())
    }

    async fn update_task_timestamps(&self, id: Uuid, patch: TimestampPatch) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(task) = inner.tasks.get_mut(&id) {
            if let Some(next) = patch.next {
                task.next_execution_at = next;
            }
            if let Some(last) = patch.last {
                task.last_execution_at = Some(last);
            }
        }
        Ok(())
    }
}
