use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::log::{ExecutionLog, LogPatch};
use crate::types::Task;

/// Patch for a task's denormalized execution timestamps.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampPatch {
    /// `Some(None)` clears the stored next fire time.
    pub next: Option<Option<DateTime<Utc>>>,
    pub last: Option<DateTime<Utc>>,
}

impl TimestampPatch {
    pub fn next(at: DateTime<Utc>) -> Self {
        Self {
            next: Some(Some(at)),
            last: None,
        }
    }

    pub fn clear_next() -> Self {
        Self {
            next: Some(None),
            last: None,
        }
    }

    pub fn last(at: DateTime<Utc>) -> Self {
        Self {
            next: None,
            last: Some(at),
        }
    }
}

/// Interface to the CRUD/persistence collaborator.
///
/// The engine never mutates tasks structurally; it reads active tasks at
/// startup, appends and seals execution log rows, and keeps the denormalized
/// next/last execution timestamps current.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// All tasks with status `Active`, used once at startup to rebuild timers.
    async fn load_active_tasks(&self) -> Result<Vec<Task>>;

    async fn append_log(&self, entry: &ExecutionLog) -> Result<()>;

    async fn update_log(&self, id: Uuid, patch: LogPatch) -> Result<()>;

    async fn get_log(&self, id: Uuid) -> Result<Option<ExecutionLog>>;

    async fn update_task_timestamps(&self, id: Uuid, patch: TimestampPatch) -> Result<()>;
}
