//! Execution pipeline: one `execute` call per attempt, producing exactly one
//! execution log row, with bounded fixed-delay retries on failure.

pub mod pipeline;

pub use pipeline::{ExecutionPipeline, TaskOutcome};
