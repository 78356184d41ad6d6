//! Task dispatch table: owns the live task-id → armed-timer mapping and the
//! start/stop/replace semantics around it.

pub mod handle;
pub mod scheduler;

pub use handle::ArmedTimer;
pub use scheduler::Scheduler;
