//! Runtime configuration for the Taskbeat engine.
//!
//! YAML file under the config directory, `TASKBEAT_*` env overrides on top,
//! validated before the engine starts.

pub mod env;
pub mod io;
pub mod schema;
pub mod validation;

pub use env::apply_env_overrides;
pub use io::{config_dir, config_file_path, load_config, write_config};
pub use schema::TaskbeatConfig;
pub use validation::{validate, ValidationReport};
