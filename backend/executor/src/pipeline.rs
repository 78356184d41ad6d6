use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

use taskbeat_core::{
    ExecutionLog, LogPatch, ScriptLanguage, Task, TaskAction, TaskStore, TimestampPatch,
};
use taskbeat_logging::redact_sensitive_data;
use taskbeat_sandbox::{FailureKind, RunLimits, RunReport, SandboxRunner};

/// Result of one dispatch of a task's logic: a JSON payload on success, a
/// legible error message on failure.
pub type TaskOutcome = Result<serde_json::Value, String>;

/// Orchestrates a single execution attempt: log creation, dispatch by task
/// kind, outcome recording, retry scheduling.
pub struct ExecutionPipeline {
    store: Arc<dyn TaskStore>,
    http: reqwest::Client,
    sandbox: SandboxRunner,
    /// At most one pending retry delay per task; `stop` cancels it together
    /// with the primary timer so a retry never fires into a stopped task.
    /// The id tags each arming so a fired delay only removes its own entry.
    retry_timers: Mutex<HashMap<Uuid, (Uuid, JoinHandle<()>)>>,
}

impl ExecutionPipeline {
    pub fn new(store: Arc<dyn TaskStore>, sandbox: SandboxRunner) -> Arc<Self> {
        Arc::new(Self {
            store,
            http: reqwest::Client::new(),
            sandbox,
            retry_timers: Mutex::new(HashMap::new()),
        })
    }

    /// Run one logged execution attempt (attempt 0 of a fresh chain).
    pub async fn execute(self: &Arc<Self>, task: &Task) {
        self.clone().execute_attempt(task.clone(), 0).await;
    }

    /// Abort the task's pending retry delay, if any.
    pub fn cancel_retry(&self, task_id: Uuid) {
        if let Some((_, handle)) = lock_unpoisoned(&self.retry_timers).remove(&task_id) {
            handle.abort();
            debug!(%task_id, "Cancelled pending retry");
        }
    }

    /// Whether a retry delay is currently armed for the task.
    pub fn retry_pending(&self, task_id: Uuid) -> bool {
        lock_unpoisoned(&self.retry_timers).contains_key(&task_id)
    }

    /// Abort every pending retry delay. Used at shutdown.
    pub fn cancel_all_retries(&self) {
        for (_, (_, handle)) in lock_unpoisoned(&self.retry_timers).drain() {
            handle.abort();
        }
    }

    async fn execute_attempt(self: Arc<Self>, task: Task, retry_count: u32) {
        let log = ExecutionLog::begin(task.id, retry_count);
        let log_id = log.id;
        if let Err(e) = self.store.append_log(&log).await {
            warn!(task_id = %task.id, error = %e, "Failed to append execution log");
        }
        if let Err(e) = self
            .store
            .update_task_timestamps(task.id, TimestampPatch::last(log.started_at))
            .await
        {
            warn!(task_id = %task.id, error = %e, "Failed to update lastExecutionTime");
        }

        let started = Instant::now();
        let outcome = self.execute_task_logic(&task).await;
        let duration_ms = started.elapsed().as_millis() as i64;
        let finished = Utc::now();

        match outcome {
            Ok(result) => {
                info!(task_id = %task.id, retry_count, duration_ms, "Task execution succeeded");
                if let Err(e) = self
                    .store
                    .update_log(log_id, LogPatch::success(finished, duration_ms, result))
                    .await
                {
                    warn!(task_id = %task.id, error = %e, "Failed to seal success log");
                }
            }
            Err(error) => {
                // Errors can quote command output or HTTP headers verbatim.
                let error = redact_sensitive_data(&error);
                warn!(task_id = %task.id, retry_count, duration_ms, error = %error,
                      "Task execution failed");
                if let Err(e) = self
                    .store
                    .update_log(log_id, LogPatch::failure(finished, duration_ms, &error))
                    .await
                {
                    warn!(task_id = %task.id, error = %e, "Failed to seal failure log");
                }
                if retry_count < task.retry.max_retries {
                    self.arm_retry(&task, retry_count + 1);
                } else if task.retry.max_retries > 0 {
                    info!(task_id = %task.id, attempts = retry_count + 1,
                          "Retry cap reached, giving up");
                }
            }
        }
    }

    /// Arm a pure-delay retry. Retries bypass the trigger calculator
    /// entirely; they re-invoke the attempt after `retry_interval_ms`.
    fn arm_retry(self: &Arc<Self>, task: &Task, next_retry: u32) {
        let delay = Duration::from_millis(task.retry.retry_interval_ms);
        info!(task_id = %task.id, attempt = next_retry, delay_ms = task.retry.retry_interval_ms,
              "Scheduling retry");
        let pipeline = self.clone();
        let retry_task = task.clone();
        let task_id = task.id;
        let retry_id = Uuid::new_v4();
        // The fired delay removes its entry under this same lock, so even a
        // zero-length delay cannot complete before its handle is recorded.
        let mut timers = lock_unpoisoned(&self.retry_timers);
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            {
                let mut timers = lock_unpoisoned(&pipeline.retry_timers);
                if matches!(timers.get(&task_id), Some((id, _)) if *id == retry_id) {
                    timers.remove(&task_id);
                }
            }
            pipeline.clone().execute_attempt(retry_task, next_retry).await;
        });
        // Cancel-then-replace: at most one pending retry per task.
        if let Some((_, previous)) = timers.insert(task_id, (retry_id, handle)) {
            previous.abort();
        }
    }

    /// Dispatch a task's logic by kind. Shared by real executions and
    /// previews; previews are never logged and never retried.
    pub async fn execute_task_logic(&self, task: &Task) -> TaskOutcome {
        match &task.action {
            TaskAction::Http {
                url,
                method,
                headers,
                body,
            } => self.execute_http(url, method, headers, body.as_deref(), task.timeout_ms).await,
            TaskAction::Command { command } => {
                let limits = RunLimits {
                    timeout_ms: task.timeout_ms,
                    ..Default::default()
                };
                let report = self.sandbox.run_command(command, task.id, &limits).await;
                report_to_outcome(report)
            }
            TaskAction::Script { source, language } => {
                let limits = RunLimits {
                    timeout_ms: task.timeout_ms,
                    ..Default::default()
                };
                let report = self
                    .sandbox
                    .run_script(source, sandbox_language(*language), task.id, &limits)
                    .await;
                report_to_outcome(report)
            }
        }
    }

    async fn execute_http(
        &self,
        url: &str,
        method: &str,
        headers: &HashMap<String, String>,
        body: Option<&str>,
        timeout_ms: u64,
    ) -> TaskOutcome {
        let mut request = match method.to_uppercase().as_str() {
            "GET" => self.http.get(url),
            "POST" => self.http.post(url),
            "PUT" => self.http.put(url),
            "DELETE" => self.http.delete(url),
            "PATCH" => self.http.patch(url),
            other => return Err(format!("unsupported HTTP method: {other}")),
        };

        for (key, value) in headers {
            request = request.header(key, value);
        }
        if let Some(body) = body {
            request = request.body(body.to_string());
        }
        request = request.timeout(Duration::from_millis(timeout_ms));

        debug!(method, url, "Dispatching HTTP task");
        let response = request.send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        let text = response.text().await.map_err(|e| e.to_string())?;

        if !status.is_success() {
            // Status line as the error, e.g. "404 Not Found".
            return Err(status.to_string());
        }
        Ok(serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text)))
    }
}

fn sandbox_language(language: ScriptLanguage) -> taskbeat_sandbox::ScriptLanguage {
    match language {
        ScriptLanguage::Python => taskbeat_sandbox::ScriptLanguage::Python,
        ScriptLanguage::Javascript => taskbeat_sandbox::ScriptLanguage::Javascript,
        ScriptLanguage::Shell => taskbeat_sandbox::ScriptLanguage::Shell,
    }
}

/// Map a sandbox report to an outcome, keeping the failure kind in the error
/// so a validation rejection reads differently from a runtime failure.
fn report_to_outcome(report: RunReport) -> TaskOutcome {
    if report.success {
        return Ok(serde_json::json!({
            "stdout": report.stdout,
            "exitCode": report.exit_code,
            "durationMs": report.duration_ms,
            "truncated": report.truncated,
        }));
    }
    let kind = report
        .failure
        .map(|f| f.as_str())
        .unwrap_or(FailureKind::RuntimeNonzeroExit.as_str());
    let detail = if !report.stderr.trim().is_empty() {
        report.stderr.trim().to_string()
    } else if let Some(code) = report.exit_code {
        format!("exit code {code}")
    } else {
        "killed".to_string()
    };
    Err(format!("{kind}: {detail}"))
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
