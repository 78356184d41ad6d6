pub mod error;
pub mod log;
pub mod store;
pub mod types;

pub use error::TaskbeatError;
pub use log::{ExecutionLog, ExecutionStatus, LogPatch};
pub use store::{TaskStore, TimestampPatch};
pub use types::{
    ConditionKind, ConditionSpec, RetryPolicy, ScriptLanguage, Task, TaskAction, TaskStatus,
    TriggerSpec, VisualKind, VisualSpec,
};
