//! Sandboxed runner: validates and executes single commands and inline
//! scripts under content and resource restrictions. Knows nothing about
//! tasks or schedules beyond the task id used for workspace isolation.

pub mod runner;
pub mod script;
pub mod validate;
pub mod workspace;

pub use runner::{FailureKind, RunLimits, RunReport, SandboxRunner};
pub use script::{validate_script, ScriptLanguage, ScriptRejection, MAX_SCRIPT_BYTES};
pub use validate::{validate_command, Rejection, MAX_COMMAND_LEN};
pub use workspace::TaskWorkspace;
