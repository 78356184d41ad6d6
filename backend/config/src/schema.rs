//! Taskbeat runtime configuration schema.
//!
//! Typed for serde YAML/JSON deserialization. Every section is optional in
//! the file; the resolver methods fill in the working defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration for the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskbeatConfig {
    /// Task and execution-log database settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseConfig>,

    /// Sandbox root and output limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxConfig>,

    /// Logging configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    /// Execution defaults and ceilings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// SQLite file path. Defaults to `<config dir>/taskbeat.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Execution-log rows to keep per pruning pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_retention: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxConfig {
    /// Directory under which per-task workspaces are created.
    /// Defaults to `<config dir>/sandbox`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    /// Per-stream captured output cap in KiB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_kib: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Log level filter ("trace" | "debug" | "info" | "warn" | "error").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Directory for rolling NDJSON log files.
    /// Defaults to `<config dir>/logs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionConfig {
    /// Per-attempt timeout applied to tasks that do not set their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_timeout_ms: Option<u64>,
    /// Hard ceiling on any per-task timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_timeout_ms: Option<u64>,
    /// Hard ceiling on any per-task retry count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries_cap: Option<u32>,
}

impl TaskbeatConfig {
    pub fn db_path(&self, config_dir: &std::path::Path) -> PathBuf {
        self.database
            .as_ref()
            .and_then(|d| d.path.clone())
            .unwrap_or_else(|| config_dir.join("taskbeat.db"))
    }

    pub fn sandbox_root(&self, config_dir: &std::path::Path) -> PathBuf {
        self.sandbox
            .as_ref()
            .and_then(|s| s.root.clone())
            .unwrap_or_else(|| config_dir.join("sandbox"))
    }

    pub fn log_dir(&self, config_dir: &std::path::Path) -> PathBuf {
        self.logging
            .as_ref()
            .and_then(|l| l.dir.clone())
            .unwrap_or_else(|| config_dir.join("logs"))
    }

    pub fn log_level(&self) -> String {
        self.logging
            .as_ref()
            .and_then(|l| l.level.clone())
            .unwrap_or_else(|| "info".to_string())
    }

    pub fn default_timeout_ms(&self) -> u64 {
        self.execution
            .as_ref()
            .and_then(|e| e.default_timeout_ms)
            .unwrap_or(30_000)
    }
}
