use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use taskbeat_config::{
    apply_env_overrides, config_dir, config_file_path, load_config, validate, TaskbeatConfig,
};
use taskbeat_core::Task;
use taskbeat_executor::ExecutionPipeline;
use taskbeat_logging::init_logger;
use taskbeat_sandbox::{validate_command, SandboxRunner};
use taskbeat_scheduler::Scheduler;
use taskbeat_storage::SqliteStore;

#[derive(Parser)]
#[command(name = "taskbeat")]
#[command(about = "Taskbeat — task scheduling and execution engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduling engine and run until interrupted
    Serve,
    /// Run a task definition once, without logging or retries
    Preview {
        /// Path to a JSON task definition
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Check a command line against the sandbox rules
    Validate {
        /// The command line to check
        command: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_dir = config_dir();
    let mut config = load_config(&config_file_path(&config_dir)).await?;
    apply_env_overrides(&mut config);

    let report = validate(&config);
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
    if !report.is_valid() {
        for error in &report.errors {
            eprintln!("error: {error}");
        }
        bail!("invalid configuration");
    }

    match cli.command {
        Commands::Serve => serve(config, &config_dir).await,
        Commands::Preview { file } => preview(config, &config_dir, &file).await,
        Commands::Validate { command } => {
            match validate_command(&command) {
                Ok(()) => {
                    println!("ok");
                    Ok(())
                }
                Err(rejection) => {
                    println!("rejected: {rejection}");
                    std::process::exit(1);
                }
            }
        }
    }
}

async fn serve(config: TaskbeatConfig, config_dir: &std::path::Path) -> Result<()> {
    let log_dir = config.log_dir(config_dir);
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
    init_logger(&log_dir, &config.log_level());

    let db_path = config.db_path(config_dir);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data directory: {}", parent.display()))?;
    }
    info!(db = %db_path.display(), sandbox = %config.sandbox_root(config_dir).display(),
          "Starting Taskbeat engine");

    let store = Arc::new(SqliteStore::open(&db_path)?);
    let sandbox = SandboxRunner::new(config.sandbox_root(config_dir));
    let pipeline = ExecutionPipeline::new(store.clone(), sandbox);
    let scheduler = Scheduler::new(store, pipeline);

    scheduler.initialize().await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");
    scheduler.shutdown();

    Ok(())
}

/// One dry-run dispatch of a task definition. Uses the same logic path as a
/// real execution but writes nothing and never retries.
async fn preview(
    config: TaskbeatConfig,
    config_dir: &std::path::Path,
    file: &std::path::Path,
) -> Result<()> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read task file: {}", file.display()))?;
    let task: Task = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid task definition: {}", file.display()))?;

    let store = Arc::new(SqliteStore::open_in_memory()?);
    let sandbox = SandboxRunner::new(config.sandbox_root(config_dir));
    let pipeline = ExecutionPipeline::new(store, sandbox);

    match pipeline.execute_task_logic(&task).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(error) => {
            eprintln!("failed: {error}");
            std::process::exit(1);
        }
    }
}
