use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A schedulable unit of work. Owned by the CRUD layer; the engine reads it
/// and keeps the denormalized execution timestamps current.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    pub action: TaskAction,
    pub trigger: TriggerSpec,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Per-attempt execution timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub next_execution_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_execution_at: Option<DateTime<Utc>>,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Task {
    pub fn new(name: impl Into<String>, action: TaskAction, trigger: TriggerSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            action,
            trigger,
            status: TaskStatus::Active,
            retry: RetryPolicy::default(),
            timeout_ms: default_timeout_ms(),
            next_execution_at: None,
            last_execution_at: None,
        }
    }
}

/// What the task does when it fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskAction {
    /// Outbound HTTP call.
    Http {
        url: String,
        #[serde(default = "default_method")]
        method: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        body: Option<String>,
    },
    /// Single command line run through the sandboxed runner.
    Command { command: String },
    /// Inline script source run through the sandboxed runner.
    Script {
        source: String,
        language: ScriptLanguage,
    },
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptLanguage {
    Python,
    Javascript,
    Shell,
}

impl ScriptLanguage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptLanguage::Python => "python",
            ScriptLanguage::Javascript => "javascript",
            ScriptLanguage::Shell => "shell",
        }
    }
}

/// When the task fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// 5-field cron expression (e.g., "*/30 * * * *"), evaluated in UTC.
    Cron { expression: String },
    /// Fixed period in milliseconds from "now", self-renewing.
    Interval { millis: u64 },
    /// One-shot fire at an absolute instant.
    Date { at: DateTime<Utc> },
    /// Human-friendly recurrence (once/minute/hour/day/week/month).
    Visual(VisualSpec),
    /// Fire on a lunar-calendar month/day; re-arms annually when `repeat`.
    Lunar {
        month: u32,
        day: u32,
        /// "HH:MM" wall-clock time; midnight when absent.
        #[serde(default)]
        time: Option<String>,
        #[serde(default)]
        repeat: bool,
    },
    /// One-shot fire at start instant + hours/minutes/seconds.
    #[serde(rename_all = "camelCase")]
    Countdown {
        #[serde(default)]
        hours: u32,
        #[serde(default)]
        minutes: u32,
        #[serde(default)]
        seconds: u32,
        started_at: DateTime<Utc>,
    },
    /// Fires when an external condition event is delivered.
    Conditional(ConditionSpec),
}

impl TriggerSpec {
    /// Stable tag for logging and timer bookkeeping.
    pub fn kind(&self) -> &'static str {
        match self {
            TriggerSpec::Cron { .. } => "cron",
            TriggerSpec::Interval { .. } => "interval",
            TriggerSpec::Date { .. } => "date",
            TriggerSpec::Visual(_) => "visual",
            TriggerSpec::Lunar { .. } => "lunar",
            TriggerSpec::Countdown { .. } => "countdown",
            TriggerSpec::Conditional(_) => "conditional",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualSpec {
    pub visual_type: VisualKind,
    /// "HH:MM" for once/day/week/month kinds.
    #[serde(default)]
    pub visual_time: Option<String>,
    /// Period count for minute/hour/day kinds (defaults to 1).
    #[serde(default)]
    pub visual_interval: Option<u32>,
    /// 0 = Sunday .. 6 = Saturday, for the week kind.
    #[serde(default)]
    pub visual_weekday: Option<u32>,
    /// Day of month 1..=31 for the month kind.
    #[serde(default)]
    pub visual_day: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualKind {
    Once,
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionSpec {
    pub condition: ConditionKind,
    /// Delay between the condition being satisfied and the fire.
    #[serde(default)]
    pub delay_ms: u64,
    /// Threshold for the resource-based kinds, interpreted by the monitor.
    #[serde(default)]
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    SystemStartup,
    SystemResume,
    CpuAbove,
    MemoryAbove,
    NetworkActive,
}

/// Task lifecycle status. Only `Active` tasks are armed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Active,
    Paused,
    Completed,
}

/// Bounded retry policy for failed execution attempts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Fixed delay between a failure and its retry, in milliseconds.
    pub retry_interval_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_interval_ms: 60_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_spec_roundtrips_tagged_json() {
        let json = r#"{"type":"visual","visualType":"once","visualTime":"09:00"}"#;
        let spec: TriggerSpec = serde_json::from_str(json).unwrap();
        match &spec {
            TriggerSpec::Visual(v) => {
                assert_eq!(v.visual_type, VisualKind::Once);
                assert_eq!(v.visual_time.as_deref(), Some("09:00"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn task_defaults_apply() {
        let json = r#"{
            "id": "7b1c0d3e-0000-4000-8000-000000000001",
            "name": "ping",
            "action": {"kind": "command", "command": "echo hi"},
            "trigger": {"type": "interval", "millis": 60000}
        }"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.status, TaskStatus::Active);
        assert_eq!(task.retry.max_retries, 0);
        assert_eq!(task.timeout_ms, 30_000);
    }

    #[test]
    fn unknown_trigger_type_is_a_parse_error() {
        let json = r#"{"type":"fortnightly"}"#;
        assert!(serde_json::from_str::<TriggerSpec>(json).is_err());
    }
}
