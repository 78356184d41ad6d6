use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use taskbeat_core::{ConditionKind, Task, TaskStatus, TaskStore, TimestampPatch, TriggerSpec};
use taskbeat_executor::ExecutionPipeline;
use taskbeat_trigger::{is_recurring, next_fire_time, NeverReason, NextFire};

/// The dispatch table: live mapping from task id to its armed timer.
///
/// `schedule_task` is the only mutator of a task's slot and always cancels
/// before it replaces, so two armed timers for one task never coexist. All
/// map mutation happens under one lock, which serializes the
/// cancel-then-replace sequence across concurrent callers.
pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    pipeline: Arc<ExecutionPipeline>,
    timers: Mutex<HashMap<Uuid, crate::ArmedTimer>>,
    /// Conditional tasks waiting for an external condition event.
    waiting: Mutex<HashMap<Uuid, Task>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn TaskStore>, pipeline: Arc<ExecutionPipeline>) -> Arc<Self> {
        Arc::new(Self {
            store,
            pipeline,
            timers: Mutex::new(HashMap::new()),
            waiting: Mutex::new(HashMap::new()),
        })
    }

    /// Load every active task from the store and arm it, then deliver the
    /// startup condition event. A store failure here is fatal.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        let tasks = self.store.load_active_tasks().await?;
        let total = tasks.len();
        let mut armed = 0usize;
        for task in &tasks {
            if self.schedule_task(task).await {
                armed += 1;
            }
        }
        info!(total, armed, "Scheduler initialized");
        self.notify_condition(ConditionKind::SystemStartup).await;
        Ok(())
    }

    /// Cancel any existing timer for the task and arm a fresh one from its
    /// current trigger configuration. Returns false when nothing could be
    /// armed; the reason is logged, never thrown past this boundary.
    pub async fn schedule_task(self: &Arc<Self>, task: &Task) -> bool {
        self.schedule_boxed(task.clone()).await
    }

    /// Boxed indirection so a fired timer can re-arm through the same path
    /// (async recursion requires type erasure).
    fn schedule_boxed(
        self: &Arc<Self>,
        task: Task,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'static>> {
        let scheduler = self.clone();
        Box::pin(async move { scheduler.schedule_inner(task).await })
    }

    async fn schedule_inner(self: Arc<Self>, task: Task) -> bool {
        if task.status != TaskStatus::Active {
            debug!(task_id = %task.id, status = ?task.status, "Task not active, stopping instead");
            self.stop_task(task.id).await;
            return false;
        }

        let now = Utc::now();
        match next_fire_time(&task.trigger, now) {
            NextFire::At(at) => {
                self.arm(task.clone(), at);
                if let Err(e) = self
                    .store
                    .update_task_timestamps(task.id, TimestampPatch::next(at))
                    .await
                {
                    warn!(task_id = %task.id, error = %e, "Failed to persist nextExecutionTime");
                }
                debug!(task_id = %task.id, kind = task.trigger.kind(), next = %at, "Timer armed");
                true
            }
            NextFire::Never(NeverReason::AwaitingCondition) => {
                self.cancel_timer(task.id);
                lock_unpoisoned(&self.waiting).insert(task.id, task.clone());
                if let Err(e) = self
                    .store
                    .update_task_timestamps(task.id, TimestampPatch::clear_next())
                    .await
                {
                    warn!(task_id = %task.id, error = %e, "Failed to clear nextExecutionTime");
                }
                debug!(task_id = %task.id, "Conditional task waiting for external event");
                true
            }
            NextFire::Never(reason) => {
                self.cancel_timer(task.id);
                if let Err(e) = self
                    .store
                    .update_task_timestamps(task.id, TimestampPatch::clear_next())
                    .await
                {
                    warn!(task_id = %task.id, error = %e, "Failed to clear nextExecutionTime");
                }
                match reason {
                    NeverReason::Exhausted => {
                        info!(task_id = %task.id, kind = task.trigger.kind(),
                              "One-shot trigger exhausted, nothing to arm")
                    }
                    _ => warn!(task_id = %task.id, kind = task.trigger.kind(),
                               "Trigger configuration invalid, task not scheduled"),
                }
                false
            }
        }
    }

    /// Spawn a sleeping timer firing at `at` and install it in the table,
    /// cancelling any previous handle inside the same critical section.
    fn arm(self: &Arc<Self>, task: Task, at: chrono::DateTime<Utc>) {
        let timer_id = Uuid::new_v4();
        let kind = task.trigger.kind();
        let delay = (at - Utc::now()).to_std().unwrap_or_default();
        let scheduler = self.clone();
        let mut timers = lock_unpoisoned(&self.timers);
        if let Some(previous) = timers.remove(&task.id) {
            previous.cancel();
        }
        let task_id = task.id;
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            scheduler.fire(task, timer_id).await;
        });
        timers.insert(task_id, crate::ArmedTimer::new(timer_id, kind, handle));
    }

    /// A timer fired: dispatch the execution pipeline (detached, so a slow
    /// run never delays other work) and re-arm recurring triggers.
    async fn fire(self: Arc<Self>, task: Task, timer_id: Uuid) {
        {
            let mut timers = lock_unpoisoned(&self.timers);
            match timers.get(&task.id) {
                // Only the current arming may fire; a stale timer that lost
                // the race to a newer schedule call bows out.
                Some(t) if t.timer_id == timer_id => {
                    timers.remove(&task.id);
                }
                _ => return,
            }
        }
        info!(task_id = %task.id, kind = task.trigger.kind(), "Trigger fired");

        let pipeline = self.pipeline.clone();
        let exec_task = task.clone();
        tokio::spawn(async move {
            pipeline.execute(&exec_task).await;
        });

        if is_recurring(&task.trigger) {
            // Re-arm from configuration rather than keeping a persistent
            // interval, so config changes take effect at the next fire.
            self.schedule_boxed(task).await;
        } else if let Err(e) = self
            .store
            .update_task_timestamps(task.id, TimestampPatch::clear_next())
            .await
        {
            warn!(task_id = %task.id, error = %e, "Failed to clear nextExecutionTime");
        }
    }

    /// Cancel the next scheduled fire and any pending retry. Idempotent; has
    /// no effect on an execution already dispatched and running.
    pub async fn stop_task(&self, task_id: Uuid) {
        self.cancel_timer(task_id);
        lock_unpoisoned(&self.waiting).remove(&task_id);
        self.pipeline.cancel_retry(task_id);
        if let Err(e) = self
            .store
            .update_task_timestamps(task_id, TimestampPatch::clear_next())
            .await
        {
            warn!(%task_id, error = %e, "Failed to clear nextExecutionTime");
        }
    }

    /// Deliver a condition event: every waiting conditional task whose
    /// sub-kind matches is armed to fire once after its configured delay.
    /// External monitors (resource thresholds, network activity) are
    /// expected to call this; none is bundled.
    pub async fn notify_condition(self: &Arc<Self>, kind: ConditionKind) {
        let matching: Vec<Task> = lock_unpoisoned(&self.waiting)
            .values()
            .filter(|t| matches!(&t.trigger, TriggerSpec::Conditional(spec) if spec.condition == kind))
            .cloned()
            .collect();
        if matching.is_empty() {
            return;
        }
        info!(kind = ?kind, tasks = matching.len(), "Condition event received");
        for task in matching {
            let delay_ms = match &task.trigger {
                TriggerSpec::Conditional(spec) => spec.delay_ms,
                _ => continue,
            };
            let at = Utc::now() + ChronoDuration::milliseconds(delay_ms as i64);
            self.arm(task.clone(), at);
            if let Err(e) = self
                .store
                .update_task_timestamps(task.id, TimestampPatch::next(at))
                .await
            {
                warn!(task_id = %task.id, error = %e, "Failed to persist nextExecutionTime");
            }
        }
    }

    /// Cancel every handle. Used once at process termination; in-flight
    /// executions are not awaited.
    pub fn shutdown(&self) {
        let count = {
            let mut timers = lock_unpoisoned(&self.timers);
            let count = timers.len();
            for (_, timer) in timers.drain() {
                timer.cancel();
            }
            count
        };
        lock_unpoisoned(&self.waiting).clear();
        self.pipeline.cancel_all_retries();
        info!(cancelled = count, "Scheduler shut down");
    }

    /// Number of armed timers (not counting waiting conditional tasks).
    pub fn armed_count(&self) -> usize {
        lock_unpoisoned(&self.timers).len()
    }

    pub fn is_armed(&self, task_id: Uuid) -> bool {
        lock_unpoisoned(&self.timers).contains_key(&task_id)
    }

    fn cancel_timer(&self, task_id: Uuid) {
        if let Some(timer) = lock_unpoisoned(&self.timers).remove(&task_id) {
            debug!(%task_id, kind = timer.kind, "Cancelled armed timer");
            timer.cancel();
        }
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskbeat_core::{ConditionSpec, ExecutionStatus, RetryPolicy, TaskAction};
    use taskbeat_sandbox::SandboxRunner;
    use taskbeat_storage::MemoryStore;
    use tokio::time::Duration;

    struct Fixture {
        store: Arc<MemoryStore>,
        scheduler: Arc<Scheduler>,
        _tmp: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let pipeline =
            ExecutionPipeline::new(store.clone(), SandboxRunner::new(tmp.path()));
        let scheduler = Scheduler::new(store.clone(), pipeline);
        Fixture {
            store,
            scheduler,
            _tmp: tmp,
        }
    }

    fn interval_task(millis: u64, command: &str) -> Task {
        Task::new(
            "interval",
            TaskAction::Command {
                command: command.into(),
            },
            TriggerSpec::Interval { millis },
        )
    }

    #[tokio::test]
    async fn at_most_one_timer_per_task() {
        let f = fixture();
        let task = interval_task(60_000, "echo hi");
        f.store.insert_task(task.clone()).await;

        for _ in 0..5 {
            assert!(f.scheduler.schedule_task(&task).await);
        }
        assert_eq!(f.scheduler.armed_count(), 1);

        // Concurrent callers still end with exactly one armed timer.
        let mut handles = Vec::new();
        for _ in 0..10 {
            let scheduler = f.scheduler.clone();
            let task = task.clone();
            handles.push(tokio::spawn(async move {
                scheduler.schedule_task(&task).await
            }));
        }
        for h in handles {
            assert!(h.await.unwrap());
        }
        assert_eq!(f.scheduler.armed_count(), 1);
    }

    #[tokio::test]
    async fn stop_then_schedule_is_idempotent() {
        let f = fixture();
        let task = interval_task(60_000, "echo hi");
        f.store.insert_task(task.clone()).await;

        assert!(f.scheduler.schedule_task(&task).await);
        for _ in 0..3 {
            f.scheduler.stop_task(task.id).await;
        }
        assert_eq!(f.scheduler.armed_count(), 0);
        assert_eq!(f.store.task(task.id).await.unwrap().next_execution_at, None);

        assert!(f.scheduler.schedule_task(&task).await);
        assert!(f.scheduler.is_armed(task.id));
        assert!(f
            .store
            .task(task.id)
            .await
            .unwrap()
            .next_execution_at
            .is_some());
    }

    #[tokio::test]
    async fn interval_task_fires_and_rearms() {
        let f = fixture();
        let task = interval_task(50, "echo tick");
        f.store.insert_task(task.clone()).await;

        assert!(f.scheduler.schedule_task(&task).await);
        tokio::time::sleep(Duration::from_millis(300)).await;

        let logs = f.store.logs_for(task.id).await;
        assert!(logs.len() >= 2, "expected repeated fires, got {}", logs.len());
        // Still armed for the next fire: the chain is self-renewing.
        assert!(f.scheduler.is_armed(task.id));

        f.scheduler.stop_task(task.id).await;
        assert!(!f.scheduler.is_armed(task.id));
    }

    #[tokio::test]
    async fn exhausted_one_shot_is_not_armed() {
        let f = fixture();
        let task = Task::new(
            "past",
            TaskAction::Command {
                command: "echo hi".into(),
            },
            TriggerSpec::Date {
                at: Utc::now() - ChronoDuration::hours(1),
            },
        );
        f.store.insert_task(task.clone()).await;
        assert!(!f.scheduler.schedule_task(&task).await);
        assert_eq!(f.scheduler.armed_count(), 0);
    }

    #[tokio::test]
    async fn invalid_cron_is_not_armed_and_does_not_panic() {
        let f = fixture();
        let task = Task::new(
            "bad-cron",
            TaskAction::Command {
                command: "echo hi".into(),
            },
            TriggerSpec::Cron {
                expression: "not a cron".into(),
            },
        );
        f.store.insert_task(task.clone()).await;
        assert!(!f.scheduler.schedule_task(&task).await);
        assert_eq!(f.scheduler.armed_count(), 0);
    }

    #[tokio::test]
    async fn one_shot_date_fires_once_and_clears() {
        let f = fixture();
        let task = Task::new(
            "soon",
            TaskAction::Command {
                command: "echo once".into(),
            },
            TriggerSpec::Date {
                at: Utc::now() + ChronoDuration::milliseconds(50),
            },
        );
        f.store.insert_task(task.clone()).await;
        assert!(f.scheduler.schedule_task(&task).await);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(f.store.logs_for(task.id).await.len(), 1);
        assert!(!f.scheduler.is_armed(task.id));
        assert_eq!(f.store.task(task.id).await.unwrap().next_execution_at, None);
    }

    #[tokio::test]
    async fn initialize_arms_active_tasks_and_fires_startup_conditionals() {
        let f = fixture();

        let mut paused = interval_task(60_000, "echo paused");
        paused.status = TaskStatus::Paused;
        f.store.insert_task(paused.clone()).await;

        let startup = Task::new(
            "on-boot",
            TaskAction::Command {
                command: "echo boot".into(),
            },
            TriggerSpec::Conditional(ConditionSpec {
                condition: ConditionKind::SystemStartup,
                delay_ms: 20,
                threshold: None,
            }),
        );
        f.store.insert_task(startup.clone()).await;

        f.scheduler.initialize().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(f.store.logs_for(paused.id).await.is_empty());
        let logs = f.store.logs_for(startup.id).await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, ExecutionStatus::Success);
    }

    #[tokio::test]
    async fn resume_event_rearms_waiting_conditional() {
        let f = fixture();
        let on_resume = Task::new(
            "on-resume",
            TaskAction::Command {
                command: "echo resumed".into(),
            },
            TriggerSpec::Conditional(ConditionSpec {
                condition: ConditionKind::SystemResume,
                delay_ms: 10,
                threshold: None,
            }),
        );
        f.store.insert_task(on_resume.clone()).await;
        assert!(f.scheduler.schedule_task(&on_resume).await);
        assert_eq!(f.scheduler.armed_count(), 0);

        f.scheduler.notify_condition(ConditionKind::SystemResume).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(f.store.logs_for(on_resume.id).await.len(), 1);

        // A second event fires it again.
        f.scheduler.notify_condition(ConditionKind::SystemResume).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(f.store.logs_for(on_resume.id).await.len(), 2);
    }

    #[tokio::test]
    async fn stop_cancels_pending_retry_as_well() {
        let f = fixture();
        let mut task = interval_task(30, "cat /taskbeat-does-not-exist");
        task.retry = RetryPolicy {
            max_retries: 5,
            retry_interval_ms: 60_000,
        };
        f.store.insert_task(task.clone()).await;
        assert!(f.scheduler.schedule_task(&task).await);

        // Let the first fire fail and arm its retry.
        tokio::time::sleep(Duration::from_millis(200)).await;
        f.scheduler.stop_task(task.id).await;
        assert!(!f.scheduler.is_armed(task.id));

        // Let any execution dispatched just before the stop settle.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let before = f.store.logs_for(task.id).await.len();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(f.store.logs_for(task.id).await.len(), before);
    }

    #[tokio::test]
    async fn shutdown_cancels_everything() {
        let f = fixture();
        for i in 0..3 {
            let task = interval_task(60_000, "echo hi");
            f.store.insert_task(task.clone()).await;
            assert!(f.scheduler.schedule_task(&task).await, "task {i}");
        }
        assert_eq!(f.scheduler.armed_count(), 3);
        f.scheduler.shutdown();
        assert_eq!(f.scheduler.armed_count(), 0);
    }
}
