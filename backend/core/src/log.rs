use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row per execution *attempt*. Retries produce their own rows with an
/// incremented `retry_count`; there is no separate lineage field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLog {
    pub id: Uuid,
    pub task_id: Uuid,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    /// Free-form success payload (JSON when the producer emits JSON).
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
}

impl ExecutionLog {
    /// Open a new attempt row in `Running` state, timestamped at dispatch.
    pub fn begin(task_id: Uuid, retry_count: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
            result: None,
            error: None,
            retry_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
}

/// Partial update applied to a log row. A `Running` row is sealed to
/// `Success` or `Failed` exactly once.
#[derive(Debug, Clone, Default)]
pub struct LogPatch {
    pub status: Option<ExecutionStatus>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl LogPatch {
    pub fn success(finished_at: DateTime<Utc>, duration_ms: i64, result: serde_json::Value) -> Self {
        Self {
            status: Some(ExecutionStatus::Success),
            finished_at: Some(finished_at),
            duration_ms: Some(duration_ms),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(finished_at: DateTime<Utc>, duration_ms: i64, error: impl Into<String>) -> Self {
        Self {
            status: Some(ExecutionStatus::Failed),
            finished_at: Some(finished_at),
            duration_ms: Some(duration_ms),
            result: None,
            error: Some(error.into()),
        }
    }

    /// Apply this patch to a log row in place.
    pub fn apply(&self, log: &mut ExecutionLog) {
        if let Some(status) = self.status {
            log.status = status;
        }
        if let Some(at) = self.finished_at {
            log.finished_at = Some(at);
        }
        if let Some(ms) = self.duration_ms {
            log.duration_ms = Some(ms);
        }
        if let Some(result) = &self.result {
            log.result = Some(result.clone());
        }
        if let Some(error) = &self.error {
            log.error = Some(error.clone());
        }
    }
}
