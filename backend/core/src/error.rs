use thiserror::Error;

/// Top-level error type for the taskbeat engine.
///
/// Errors never cross from one task's pipeline into another's; variants exist
/// so every failure written to an execution log carries a legible category.
#[derive(Debug, Error)]
pub enum TaskbeatError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("sandbox rejected: {0}")]
    SandboxRejected(String),

    #[error("scheduling failed: {0}")]
    Scheduling(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
