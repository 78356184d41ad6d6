use std::path::Path;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use taskbeat_core::{
    ExecutionLog, ExecutionStatus, LogPatch, Task, TaskStatus, TaskStore, TimestampPatch,
};

/// Durable SQLite-backed store for task records and execution logs.
pub struct SqliteStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    /// Open (and migrate) the database. Failure here is fatal at startup.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path)
            .with_context(|| format!("open task store {}", db_path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, handy for tests and previews.
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory().context("open in-memory store")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub async fn upsert_task(&self, task: &Task) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO tasks
               (id, name, action, trigger_spec, status, max_retries, retry_interval_ms,
                timeout_ms, next_execution_at, last_execution_at, created_at)
               VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
               ON CONFLICT(id) DO UPDATE SET
                 name=excluded.name,
                 action=excluded.action,
                 trigger_spec=excluded.trigger_spec,
                 status=excluded.status,
                 max_retries=excluded.max_retries,
                 retry_interval_ms=excluded.retry_interval_ms,
                 timeout_ms=excluded.timeout_ms"#,
            rusqlite::params![
                task.id.to_string(),
                task.name,
                serde_json::to_string(&task.action)?,
                serde_json::to_string(&task.trigger)?,
                status_str(task.status),
                task.retry.max_retries,
                task.retry.retry_interval_ms as i64,
                task.timeout_ms as i64,
                task.next_execution_at.map(|t| t.timestamp_millis()),
                task.last_execution_at.map(|t| t.timestamp_millis()),
                Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub async fn delete_task(&self, id: Uuid) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM tasks WHERE id = ?1",
            rusqlite::params![id.to_string()],
        )?;
        Ok(())
    }

    pub async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, name, action, trigger_spec, status, max_retries, retry_interval_ms,
                    timeout_ms, next_execution_at, last_execution_at
             FROM tasks WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(rusqlite::params![id.to_string()], row_to_task)?;
        match rows.next() {
            Some(row) => Ok(Some(row??)),
            None => Ok(None),
        }
    }

    /// Most recent log rows for a task, newest first.
    pub async fn recent_logs(&self, task_id: Uuid, limit: usize) -> Result<Vec<ExecutionLog>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, task_id, status, started_at, finished_at, duration_ms,
                    result, error, retry_count
             FROM execution_logs WHERE task_id = ?1
             ORDER BY started_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(
                rusqlite::params![task_id.to_string(), limit as i64],
                row_to_log,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().collect()
    }

    /// Prune log rows older than `max_age_secs`. Returns the number removed.
    pub async fn prune_logs(&self, max_age_secs: i64) -> Result<usize> {
        let cutoff = Utc::now().timestamp_millis() - max_age_secs * 1000;
        let conn = self.conn.lock().await;
        let n = conn.execute(
            "DELETE FROM execution_logs WHERE started_at < ?1",
            rusqlite::params![cutoff],
        )?;
        Ok(n)
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn load_active_tasks(&self) -> Result<Vec<Task>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, name, action, trigger_spec, status, max_retries, retry_interval_ms,
                    timeout_ms, next_execution_at, last_execution_at
             FROM tasks WHERE status = 'active'",
        )?;
        let rows = stmt.query_map([], row_to_task)?;
        let mut tasks = Vec::new();
        for row in rows {
            match row? {
                Ok(task) => tasks.push(task),
                // One corrupt row must not keep every other task from arming.
                Err(e) => warn!(error = %e, "Skipping unreadable task row"),
            }
        }
        Ok(tasks)
    }

    async fn append_log(&self, entry: &ExecutionLog) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO execution_logs
               (id, task_id, status, started_at, finished_at, duration_ms,
                result, error, retry_count)
               VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)"#,
            rusqlite::params![
                entry.id.to_string(),
                entry.task_id.to_string(),
                log_status_str(entry.status),
                entry.started_at.timestamp_millis(),
                entry.finished_at.map(|t| t.timestamp_millis()),
                entry.duration_ms,
                entry
                    .result
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                entry.error,
                entry.retry_count,
            ],
        )?;
        Ok(())
    }

    async fn update_log(&self, id: Uuid, patch: LogPatch) -> Result<()> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, task_id, status, started_at, finished_at, duration_ms,
                    result, error, retry_count
             FROM execution_logs WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(rusqlite::params![id.to_string()], row_to_log)?;
        let mut log = match rows.next() {
            Some(row) => row??,
            None => return Err(anyhow!("execution log {id} not found")),
        };
        drop(rows);
        drop(stmt);
        patch.apply(&mut log);
        conn.execute(
            r#"UPDATE execution_logs SET
                 status=?2, finished_at=?3, duration_ms=?4, result=?5, error=?6
               WHERE id=?1"#,
            rusqlite::params![
                id.to_string(),
                log_status_str(log.status),
                log.finished_at.map(|t| t.timestamp_millis()),
                log.duration_ms,
                log.result.as_ref().map(serde_json::to_string).transpose()?,
                log.error,
            ],
        )?;
        Ok(())
    }

    async fn get_log(&self, id: Uuid) -> Result<Option<ExecutionLog>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, task_id, status, started_at, finished_at, duration_ms,
                    result, error, retry_count
             FROM execution_logs WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(rusqlite::params![id.to_string()], row_to_log)?;
        match rows.next() {
            Some(row) => Ok(Some(row??)),
            None => Ok(None),
        }
    }

    async fn update_task_timestamps(&self, id: Uuid, patch: TimestampPatch) -> Result<()> {
        let conn = self.conn.lock().await;
        if let Some(next) = patch.next {
            conn.execute(
                "UPDATE tasks SET next_execution_at = ?2 WHERE id = ?1",
                rusqlite::params![id.to_string(), next.map(|t| t.timestamp_millis())],
            )?;
        }
        if let Some(last) = patch.last {
            conn.execute(
                "UPDATE tasks SET last_execution_at = ?2 WHERE id = ?1",
                rusqlite::params![id.to_string(), last.timestamp_millis()],
            )?;
        }
        Ok(())
    }
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id                TEXT PRIMARY KEY,
        name              TEXT NOT NULL,
        action            TEXT NOT NULL,
        trigger_spec      TEXT NOT NULL,
        status            TEXT NOT NULL DEFAULT 'active',
        max_retries       INTEGER NOT NULL DEFAULT 0,
        retry_interval_ms INTEGER NOT NULL DEFAULT 60000,
        timeout_ms        INTEGER NOT NULL DEFAULT 30000,
        next_execution_at INTEGER,
        last_execution_at INTEGER,
        created_at        INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS execution_logs (
        id          TEXT PRIMARY KEY,
        task_id     TEXT NOT NULL,
        status      TEXT NOT NULL,
        started_at  INTEGER NOT NULL,
        finished_at INTEGER,
        duration_ms INTEGER,
        result      TEXT,
        error       TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS execution_logs_task_id ON execution_logs(task_id);
    "#;

fn status_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Active => "active",
        TaskStatus::Paused => "paused",
        TaskStatus::Completed => "completed",
    }
}

fn parse_status(s: &str) -> TaskStatus {
    match s {
        "paused" => TaskStatus::Paused,
        "completed" => TaskStatus::Completed,
        _ => TaskStatus::Active,
    }
}

fn log_status_str(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Running => "running",
        ExecutionStatus::Success => "success",
        ExecutionStatus::Failed => "failed",
    }
}

fn parse_log_status(s: &str) -> ExecutionStatus {
    match s {
        "success" => ExecutionStatus::Success,
        "failed" => ExecutionStatus::Failed,
        _ => ExecutionStatus::Running,
    }
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Task>> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let action: String = row.get(2)?;
    let trigger: String = row.get(3)?;
    let status: String = row.get(4)?;
    let max_retries: u32 = row.get(5)?;
    let retry_interval_ms: i64 = row.get(6)?;
    let timeout_ms: i64 = row.get(7)?;
    let next: Option<i64> = row.get(8)?;
    let last: Option<i64> = row.get(9)?;
    Ok((|| {
        Ok(Task {
            id: id.parse()?,
            name,
            action: serde_json::from_str(&action)?,
            trigger: serde_json::from_str(&trigger)?,
            status: parse_status(&status),
            retry: taskbeat_core::RetryPolicy {
                max_retries,
                retry_interval_ms: retry_interval_ms as u64,
            },
            timeout_ms: timeout_ms as u64,
            next_execution_at: next.and_then(DateTime::<Utc>::from_timestamp_millis),
            last_execution_at: last.and_then(DateTime::<Utc>::from_timestamp_millis),
        })
    })())
}

fn row_to_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<ExecutionLog>> {
    let id: String = row.get(0)?;
    let task_id: String = row.get(1)?;
    let status: String = row.get(2)?;
    let started_at: i64 = row.get(3)?;
    let finished_at: Option<i64> = row.get(4)?;
    let duration_ms: Option<i64> = row.get(5)?;
    let result: Option<String> = row.get(6)?;
    let error: Option<String> = row.get(7)?;
    let retry_count: u32 = row.get(8)?;
    Ok((|| {
        Ok(ExecutionLog {
            id: id.parse()?,
            task_id: task_id.parse()?,
            status: parse_log_status(&status),
            started_at: DateTime::<Utc>::from_timestamp_millis(started_at)
                .ok_or_else(|| anyhow!("bad started_at {started_at}"))?,
            finished_at: finished_at.and_then(DateTime::<Utc>::from_timestamp_millis),
            duration_ms,
            result: result.map(|s| serde_json::from_str(&s)).transpose()?,
            error,
            retry_count,
        })
    })())
}
