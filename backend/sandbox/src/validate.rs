//! Command validation: everything here runs before anything is spawned.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Length ceiling for a command line.
pub const MAX_COMMAND_LEN: usize = 1000;

/// Leading tokens accepted for execution. Everything else is refused, even
/// when no denylist pattern matches.
const SAFE_BINS: &[&str] = &[
    "echo", "printf", "ls", "cat", "date", "pwd", "whoami", "uname", "uptime", "head", "tail",
    "wc", "sort", "uniq", "grep", "find", "df", "du", "free", "sleep", "ping", "curl", "git",
    // Script interpreters; the script path funnels through this check.
    "python3", "python", "node", "bash", "sh",
];

/// Shell metacharacters refused outright. Commands run without a shell, so
/// none of these have a legitimate use here.
const METACHARACTERS: &[char] = &[';', '&', '|', '`', '$', '(', ')', '<', '>', '\n'];

static PRIVILEGE_ESCALATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(sudo|su|doas|pkexec|runas)\b").unwrap());

static DESTRUCTIVE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\brm\s+-[^\s]*[rf]|\b(mkfs|shred|wipefs)\b|\bdd\s+if=").unwrap());

static POWER_CONTROL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(shutdown|reboot|poweroff|halt)\b|\binit\s+0\b").unwrap());

static REMOTE_SHELL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(nc|ncat|netcat|telnet|ssh|scp)\b").unwrap());

/// Why a command was refused before spawning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("command is empty")]
    Empty,

    #[error("command exceeds {MAX_COMMAND_LEN} characters ({0})")]
    TooLong(usize),

    #[error("command matches denied pattern: {0}")]
    DeniedPattern(&'static str),

    #[error("command contains shell metacharacter '{0}'")]
    Metacharacter(char),

    #[error("'{0}' is not an allowed utility")]
    DisallowedBinary(String),
}

/// Validate a command line against the content restrictions.
pub fn validate_command(command: &str) -> Result<(), Rejection> {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return Err(Rejection::Empty);
    }
    if trimmed.len() > MAX_COMMAND_LEN {
        return Err(Rejection::TooLong(trimmed.len()));
    }
    if PRIVILEGE_ESCALATION_RE.is_match(trimmed) {
        return Err(Rejection::DeniedPattern("privilege escalation"));
    }
    if DESTRUCTIVE_RE.is_match(trimmed) {
        return Err(Rejection::DeniedPattern("filesystem destruction"));
    }
    if POWER_CONTROL_RE.is_match(trimmed) {
        return Err(Rejection::DeniedPattern("power control"));
    }
    if REMOTE_SHELL_RE.is_match(trimmed) {
        return Err(Rejection::DeniedPattern("remote shell tool"));
    }
    if let Some(c) = trimmed.chars().find(|c| METACHARACTERS.contains(c)) {
        return Err(Rejection::Metacharacter(c));
    }
    let leading = trimmed.split_whitespace().next().unwrap_or_default();
    if !SAFE_BINS.contains(&leading) {
        return Err(Rejection::DisallowedBinary(leading.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_plain_echo() {
        assert_eq!(validate_command("echo hello"), Ok(()));
    }

    #[test]
    fn rejects_empty_and_oversized() {
        assert_eq!(validate_command("   "), Err(Rejection::Empty));
        let long = format!("echo {}", "x".repeat(MAX_COMMAND_LEN));
        assert!(matches!(validate_command(&long), Err(Rejection::TooLong(_))));
    }

    #[test]
    fn rejects_destructive_and_privileged_commands() {
        assert!(matches!(
            validate_command("rm -rf /tmp/x"),
            Err(Rejection::DeniedPattern("filesystem destruction"))
        ));
        assert!(matches!(
            validate_command("sudo ls"),
            Err(Rejection::DeniedPattern("privilege escalation"))
        ));
        assert!(matches!(
            validate_command("dd if=/dev/zero of=/dev/sda"),
            Err(Rejection::DeniedPattern("filesystem destruction"))
        ));
    }

    #[test]
    fn rejects_shell_metacharacters() {
        for cmd in [
            "echo hi; rm x",
            "echo hi & echo there",
            "echo `id`",
            "echo $(id)",
            "cat /etc/passwd | grep root",
        ] {
            assert!(
                matches!(validate_command(cmd), Err(Rejection::Metacharacter(_))),
                "{cmd}"
            );
        }
    }

    #[test]
    fn rejects_unlisted_binaries() {
        assert!(matches!(
            validate_command("gcc main.c"),
            Err(Rejection::DisallowedBinary(_))
        ));
    }

    #[test]
    fn rejects_power_and_remote_shell_tools() {
        assert!(validate_command("reboot now").is_err());
        assert!(validate_command("nc -l 4444").is_err());
    }
}
