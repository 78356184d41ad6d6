use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use uuid::Uuid;

/// Per-task working directory under the sandbox root, created on demand.
///
/// Owned by the task's in-flight execution; concurrent executions of the
/// same task share it, which is an accepted limitation.
#[derive(Debug, Clone)]
pub struct TaskWorkspace {
    root: PathBuf,
}

impl TaskWorkspace {
    pub async fn create(sandbox_root: &Path, task_id: Uuid) -> Result<Self> {
        let root = sandbox_root.join(format!("task-{task_id}"));
        for sub in ["tmp", "logs", "output"] {
            fs::create_dir_all(root.join(sub))
                .await
                .with_context(|| format!("create workspace dir {}", root.join(sub).display()))?;
        }
        Ok(Self { root })
    }

    pub fn dir(&self) -> &Path {
        &self.root
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }
}
