//! Config validation: schema checks with user-friendly error messages.

use crate::schema::TaskbeatConfig;
use thiserror::Error;

/// A config validation error with field path and message.
#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// A collection of validation errors found in one pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate the config and return a report of all errors and warnings.
pub fn validate(config: &TaskbeatConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_logging(config, &mut report);
    validate_execution(config, &mut report);
    validate_sandbox(config, &mut report);
    report
}

fn validate_logging(config: &TaskbeatConfig, report: &mut ValidationReport) {
    let Some(logging) = &config.logging else { return };
    if let Some(level) = &logging.level {
        if !LEVELS.contains(&level.as_str()) {
            report.error(
                "logging.level",
                format!("Unknown level '{level}'; expected one of {LEVELS:?}"),
            );
        }
    }
}

fn validate_execution(config: &TaskbeatConfig, report: &mut ValidationReport) {
    let Some(execution) = &config.execution else { return };
    if let Some(ms) = execution.default_timeout_ms {
        if ms == 0 {
            report.error("execution.defaultTimeoutMs", "Timeout must be positive");
        }
    }
    if let (Some(default), Some(max)) = (execution.default_timeout_ms, execution.max_timeout_ms) {
        if default > max {
            report.error(
                "execution.defaultTimeoutMs",
                "Default timeout exceeds maxTimeoutMs",
            );
        }
    }
    if execution.max_retries_cap == Some(0) {
        report.warn("execution.maxRetriesCap", "Retries are disabled for all tasks");
    }
}

fn validate_sandbox(config: &TaskbeatConfig, report: &mut ValidationReport) {
    let Some(sandbox) = &config.sandbox else { return };
    if sandbox.max_output_kib == Some(0) {
        report.error("sandbox.maxOutputKib", "Output cap must be positive");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ExecutionConfig, LoggingConfig};

    #[test]
    fn default_config_is_valid() {
        assert!(validate(&TaskbeatConfig::default()).is_valid());
    }

    #[test]
    fn bad_level_is_an_error() {
        let mut config = TaskbeatConfig::default();
        config.logging = Some(LoggingConfig {
            level: Some("loud".into()),
            dir: None,
        });
        let report = validate(&config);
        assert!(!report.is_valid());
        assert_eq!(report.errors[0].path, "logging.level");
    }

    #[test]
    fn zero_timeout_is_an_error() {
        let mut config = TaskbeatConfig::default();
        config.execution = Some(ExecutionConfig {
            default_timeout_ms: Some(0),
            max_timeout_ms: None,
            max_retries_cap: None,
        });
        assert!(!validate(&config).is_valid());
    }
}
