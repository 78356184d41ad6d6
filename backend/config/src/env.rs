//! Environment variable overrides for config values.
//!
//! `TASKBEAT_*` variables win over file values, so deployments can retarget
//! paths and levels without editing the YAML.

use crate::schema::{
    DatabaseConfig, ExecutionConfig, LoggingConfig, SandboxConfig, TaskbeatConfig,
};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::warn;

/// Apply overrides from the process environment.
pub fn apply_env_overrides(config: &mut TaskbeatConfig) {
    apply_overrides_with(config, &std::env::vars().collect());
}

/// Apply overrides from a provided map (useful for testing).
pub fn apply_overrides_with(config: &mut TaskbeatConfig, env: &HashMap<String, String>) {
    if let Some(path) = non_empty(env, "TASKBEAT_DB_PATH") {
        config
            .database
            .get_or_insert_with(DatabaseConfig::default)
            .path = Some(PathBuf::from(path));
    }
    if let Some(root) = non_empty(env, "TASKBEAT_SANDBOX_ROOT") {
        config
            .sandbox
            .get_or_insert_with(SandboxConfig::default)
            .root = Some(PathBuf::from(root));
    }
    if let Some(dir) = non_empty(env, "TASKBEAT_LOG_DIR") {
        config.logging.get_or_insert_with(LoggingConfig::default).dir =
            Some(PathBuf::from(dir));
    }
    if let Some(level) = non_empty(env, "TASKBEAT_LOG_LEVEL") {
        config
            .logging
            .get_or_insert_with(LoggingConfig::default)
            .level = Some(level);
    }
    if let Some(raw) = non_empty(env, "TASKBEAT_DEFAULT_TIMEOUT_MS") {
        match raw.parse::<u64>() {
            Ok(ms) => {
                config
                    .execution
                    .get_or_insert_with(ExecutionConfig::default)
                    .default_timeout_ms = Some(ms);
            }
            Err(_) => warn!(value = %raw, "TASKBEAT_DEFAULT_TIMEOUT_MS is not a number, ignored"),
        }
    }
}

fn non_empty(env: &HashMap<String, String>, key: &str) -> Option<String> {
    env.get(key).filter(|v| !v.is_empty()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn env_wins_over_file_value() {
        let mut config = TaskbeatConfig::default();
        config.logging = Some(LoggingConfig {
            level: Some("info".into()),
            dir: None,
        });
        apply_overrides_with(&mut config, &env(&[("TASKBEAT_LOG_LEVEL", "trace")]));
        assert_eq!(config.log_level(), "trace");
    }

    #[test]
    fn empty_value_is_ignored() {
        let mut config = TaskbeatConfig::default();
        apply_overrides_with(&mut config, &env(&[("TASKBEAT_LOG_LEVEL", "")]));
        assert_eq!(config.log_level(), "info");
    }

    #[test]
    fn non_numeric_timeout_is_ignored() {
        let mut config = TaskbeatConfig::default();
        apply_overrides_with(
            &mut config,
            &env(&[("TASKBEAT_DEFAULT_TIMEOUT_MS", "soon")]),
        );
        assert_eq!(config.default_timeout_ms(), 30_000);
    }

    #[test]
    fn paths_land_in_their_sections() {
        let mut config = TaskbeatConfig::default();
        apply_overrides_with(
            &mut config,
            &env(&[
                ("TASKBEAT_DB_PATH", "/var/lib/taskbeat/tasks.db"),
                ("TASKBEAT_SANDBOX_ROOT", "/var/lib/taskbeat/sandbox"),
            ]),
        );
        let dir = std::path::Path::new("/unused");
        assert_eq!(
            config.db_path(dir),
            PathBuf::from("/var/lib/taskbeat/tasks.db")
        );
        assert_eq!(
            config.sandbox_root(dir),
            PathBuf::from("/var/lib/taskbeat/sandbox")
        );
    }
}
