//! Persistence for tasks and execution logs.
//!
//! `SqliteStore` is the production store; `MemoryStore` backs tests in the
//! scheduler and executor crates.

pub mod mem;
pub mod sqlite;

pub use mem::MemoryStore;
pub use sqlite::SqliteStore;
