//! Script execution path: source validation, language harness wrapping, and
//! dispatch through the command path.
//!
//! The source denylist is a known-weak boundary: a blocklist of dangerous
//! substrings is inherently incomplete. A production deployment should favor
//! allowlisting or process-level isolation (container/seccomp) instead.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tokio::fs;
use tracing::warn;
use uuid::Uuid;

use crate::runner::{RunLimits, RunReport, SandboxRunner};
use crate::workspace::TaskWorkspace;

/// Source size ceiling.
pub const MAX_SCRIPT_BYTES: usize = 100 * 1024;

/// Marker lines the harnesses emit around the user script.
pub const BEGIN_MARKER: &str = "__TASKBEAT_BEGIN__";
pub const END_MARKER: &str = "__TASKBEAT_END__";

/// The fixed set of accepted scripting languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptLanguage {
    Python,
    Javascript,
    Shell,
}

impl ScriptLanguage {
    fn interpreter(&self) -> &'static str {
        match self {
            ScriptLanguage::Python => "python3",
            ScriptLanguage::Javascript => "node",
            ScriptLanguage::Shell => "bash",
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            ScriptLanguage::Python => "py",
            ScriptLanguage::Javascript => "js",
            ScriptLanguage::Shell => "sh",
        }
    }
}

/// Why a script was refused before execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptRejection {
    #[error("script source is empty")]
    Empty,

    #[error("script exceeds {MAX_SCRIPT_BYTES} bytes ({0})")]
    TooLarge(usize),

    #[error("script contains denied construct: {0}")]
    DeniedConstruct(&'static str),
}

static PYTHON_DENY: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"\b(os\.system|os\.popen|subprocess|pty\.)").unwrap(),
            "process escape",
        ),
        (
            Regex::new(r"\b(shutil\.rmtree|os\.remove|os\.unlink|os\.rmdir)").unwrap(),
            "filesystem destruction",
        ),
        (
            Regex::new(r"\b(eval|exec|compile|__import__)\s*\(").unwrap(),
            "dynamic code evaluation",
        ),
        (
            Regex::new(r"\b(os\._exit|os\.kill|os\.abort|sys\.exit)\s*\(").unwrap(),
            "process termination",
        ),
        (Regex::new(r"\brm\s+-[^\s]*[rf]").unwrap(), "destructive shell"),
    ]
});

static JAVASCRIPT_DENY: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (Regex::new(r"child_process").unwrap(), "process escape"),
        (
            Regex::new(r"\bfs\.(rm|rmdir|unlink|rmSync|rmdirSync|unlinkSync)").unwrap(),
            "filesystem destruction",
        ),
        (
            Regex::new(r"\beval\s*\(|\bnew\s+Function\s*\(|\bFunction\s*\(").unwrap(),
            "dynamic code evaluation",
        ),
        (
            Regex::new(r"\bprocess\.(exit|kill|abort)\s*\(").unwrap(),
            "process termination",
        ),
        (Regex::new(r"\brm\s+-[^\s]*[rf]").unwrap(), "destructive shell"),
    ]
});

static SHELL_DENY: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"\brm\s+-[^\s]*[rf]|\b(mkfs|shred|wipefs)\b|\bdd\s+if=").unwrap(),
            "filesystem destruction",
        ),
        (
            Regex::new(r"\b(sudo|su|doas|pkexec)\b").unwrap(),
            "privilege escalation",
        ),
        (
            Regex::new(r"\b(shutdown|reboot|poweroff|halt)\b").unwrap(),
            "power control",
        ),
        (Regex::new(r"\beval\b").unwrap(), "dynamic code evaluation"),
        (
            Regex::new(r"\bkill\s+-9|:\(\)\s*\{").unwrap(),
            "process termination",
        ),
    ]
});

/// Validate script source against the per-language denylist.
pub fn validate_script(source: &str, language: ScriptLanguage) -> Result<(), ScriptRejection> {
    if source.trim().is_empty() {
        return Err(ScriptRejection::Empty);
    }
    if source.len() > MAX_SCRIPT_BYTES {
        return Err(ScriptRejection::TooLarge(source.len()));
    }
    let deny = match language {
        ScriptLanguage::Python => &*PYTHON_DENY,
        ScriptLanguage::Javascript => &*JAVASCRIPT_DENY,
        ScriptLanguage::Shell => &*SHELL_DENY,
    };
    for (re, label) in deny {
        if re.is_match(source) {
            return Err(ScriptRejection::DeniedConstruct(label));
        }
    }
    Ok(())
}

const PYTHON_HARNESS: &str = r#"import runpy, sys, traceback

print("__TASKBEAT_BEGIN__", flush=True)
try:
    runpy.run_path(sys.argv[1], run_name="__main__")
except BaseException:
    traceback.print_exc()
    print("__TASKBEAT_END__ error", flush=True)
    raise SystemExit(1)
print("__TASKBEAT_END__ ok", flush=True)
"#;

const JAVASCRIPT_HARNESS: &str = r#"console.log("__TASKBEAT_BEGIN__");
try {
  require(process.argv[2]);
  console.log("__TASKBEAT_END__ ok");
} catch (err) {
  console.error(err && err.stack ? err.stack : String(err));
  console.log("__TASKBEAT_END__ error");
  process.exitCode = 1;
}
"#;

const SHELL_HARNESS: &str = r#"echo "__TASKBEAT_BEGIN__"
bash "$1"
rc=$?
if [ "$rc" -eq 0 ]; then
  echo "__TASKBEAT_END__ ok"
else
  echo "__TASKBEAT_END__ error"
fi
exit "$rc"
"#;

fn harness_for(language: ScriptLanguage) -> &'static str {
    match language {
        ScriptLanguage::Python => PYTHON_HARNESS,
        ScriptLanguage::Javascript => JAVASCRIPT_HARNESS,
        ScriptLanguage::Shell => SHELL_HARNESS,
    }
}

impl SandboxRunner {
    /// Validate, wrap, and run an inline script through the command path.
    pub async fn run_script(
        &self,
        source: &str,
        language: ScriptLanguage,
        task_id: Uuid,
        limits: &RunLimits,
    ) -> RunReport {
        if let Err(rejection) = validate_script(source, language) {
            warn!(%task_id, language = ?language, %rejection, "Script rejected before execution");
            return RunReport::validation_failed(rejection.to_string());
        }

        let workspace = match TaskWorkspace::create(self.sandbox_root(), task_id).await {
            Ok(ws) => ws,
            Err(e) => return RunReport::spawn_error(e.to_string(), 0),
        };

        let run_id = Uuid::new_v4();
        let ext = language.extension();
        let script_path = workspace.tmp_dir().join(format!("script-{run_id}.{ext}"));
        let harness_path = workspace.tmp_dir().join(format!("harness-{run_id}.{ext}"));

        for (path, contents) in [(&script_path, source), (&harness_path, harness_for(language))] {
            if let Err(e) = fs::write(path, contents).await {
                return RunReport::spawn_error(
                    format!("failed to stage script {}: {e}", path.display()),
                    0,
                );
            }
        }

        // Staged paths go through as explicit arguments; a sandbox root with
        // whitespace in it must not change what gets executed.
        let args = vec![harness_path.into_os_string(), script_path.into_os_string()];
        self.run_program(language.interpreter(), &args, task_id, limits)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_oversized_source() {
        assert_eq!(
            validate_script("  ", ScriptLanguage::Python),
            Err(ScriptRejection::Empty)
        );
        let big = "x = 1\n".repeat(MAX_SCRIPT_BYTES / 4);
        assert!(matches!(
            validate_script(&big, ScriptLanguage::Python),
            Err(ScriptRejection::TooLarge(_))
        ));
    }

    #[test]
    fn rejects_dangerous_python_constructs() {
        for src in [
            "import subprocess\nsubprocess.run(['ls'])",
            "eval('1+1')",
            "import shutil\nshutil.rmtree('/tmp')",
            "import sys\nsys.exit(1)",
        ] {
            assert!(validate_script(src, ScriptLanguage::Python).is_err(), "{src}");
        }
    }

    #[test]
    fn rejects_dangerous_javascript_constructs() {
        for src in [
            "require('child_process').execSync('ls')",
            "eval('1+1')",
            "process.exit(1)",
            "fs.rmSync('/tmp', { recursive: true })",
        ] {
            assert!(
                validate_script(src, ScriptLanguage::Javascript).is_err(),
                "{src}"
            );
        }
    }

    #[test]
    fn rejects_dangerous_shell_constructs() {
        for src in ["rm -rf /", "sudo whoami", "eval $cmd", "kill -9 1"] {
            assert!(validate_script(src, ScriptLanguage::Shell).is_err(), "{src}");
        }
    }

    #[test]
    fn accepts_benign_sources() {
        assert!(validate_script("print('hi')", ScriptLanguage::Python).is_ok());
        assert!(validate_script("console.log('hi')", ScriptLanguage::Javascript).is_ok());
        assert!(validate_script("echo hi", ScriptLanguage::Shell).is_ok());
    }

    #[tokio::test]
    async fn shell_script_runs_through_the_harness() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = SandboxRunner::new(tmp.path());
        let report = runner
            .run_script(
                "echo from-script",
                ScriptLanguage::Shell,
                Uuid::new_v4(),
                &RunLimits::default(),
            )
            .await;
        assert!(report.success, "stderr: {}", report.stderr);
        assert!(report.stdout.contains(BEGIN_MARKER));
        assert!(report.stdout.contains("from-script"));
        assert!(report.stdout.contains(&format!("{END_MARKER} ok")));
    }

    #[tokio::test]
    async fn runs_scripts_from_a_root_containing_spaces() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("sandbox root");
        std::fs::create_dir(&root).unwrap();
        let runner = SandboxRunner::new(&root);
        let report = runner
            .run_script(
                "echo spaced",
                ScriptLanguage::Shell,
                Uuid::new_v4(),
                &RunLimits::default(),
            )
            .await;
        assert!(report.success, "stderr: {}", report.stderr);
        assert!(report.stdout.contains("spaced"));
        assert!(report.stdout.contains(&format!("{END_MARKER} ok")));
    }

    #[tokio::test]
    async fn failing_shell_script_reports_error_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = SandboxRunner::new(tmp.path());
        let report = runner
            .run_script(
                "exit 3",
                ScriptLanguage::Shell,
                Uuid::new_v4(),
                &RunLimits::default(),
            )
            .await;
        assert!(!report.success);
        assert_eq!(report.exit_code, Some(3));
        assert!(report.stdout.contains(&format!("{END_MARKER} error")));
    }
}
