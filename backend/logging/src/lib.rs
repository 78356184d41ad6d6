//! Structured logging for the Taskbeat engine.
//!
//! Handles console output, NDJSON file rotation, and redaction of sensitive
//! values before they reach the log stream.

pub mod logger;
pub mod redact;

pub use logger::init_logger;
pub use redact::redact_sensitive_data;
