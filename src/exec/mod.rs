//! Command execution.
//!
//! [`Engine`] is the seam the pipeline runs commands through.
//! [`ShellEngine`] is the real one: a sanitized, process-group-isolated
//! bash under a timeout. Every failure mode comes back as an
//! [`ExecutionResult`] carrying one of the reserved exit codes.

pub mod interrupt;
mod process;
mod shell;

use std::time::Duration;

use serde::Serialize;

use crate::extract::Command;

pub use shell::ShellEngine;

/// The command ran past its timeout and its process group was killed.
pub const EXIT_TIMEOUT: i32 = 124;
/// The safety gate rejected the command; nothing was spawned.
pub const EXIT_BLOCKED: i32 = 126;
/// The interpreter could not be started, or waiting on it failed.
pub const EXIT_SPAWN_ERROR: i32 = 127;
/// The runner was interrupted while the command ran.
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecStatus {
    Completed,
    TimedOut,
    /// Killed because the runner received SIGINT/SIGTERM.
    Killed,
    SpawnError,
    /// Synthetic result of a safety gate rejection.
    Blocked,
}

impl ExecStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecStatus::Completed => "completed",
            ExecStatus::TimedOut => "timed-out",
            ExecStatus::Killed => "killed",
            ExecStatus::SpawnError => "spawn-error",
            ExecStatus::Blocked => "blocked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    /// The command as rendered (heredoc body included).
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub status: ExecStatus,
}

impl ExecutionResult {
    pub fn blocked(command: &Command, reason: &str) -> Self {
        Self {
            command: command.to_string(),
            exit_code: EXIT_BLOCKED,
            stdout: String::new(),
            stderr: format!("blocked by policy: {reason}"),
            status: ExecStatus::Blocked,
        }
    }

    pub fn spawn_error(command: String, error: impl std::fmt::Display) -> Self {
        Self {
            command,
            exit_code: EXIT_SPAWN_ERROR,
            stdout: String::new(),
            stderr: error.to_string(),
            status: ExecStatus::SpawnError,
        }
    }
}

/// Runs one vetted command. Implementations never panic and never return
/// before every process they started is gone.
pub trait Engine {
    fn run(&self, command: &Command, timeout: Duration) -> ExecutionResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_result_never_ran() {
        let cmd = Command::Plain("curl http://x".into());
        let r = ExecutionResult::blocked(&cmd, "curl is not trusted");
        assert_eq!(r.exit_code, EXIT_BLOCKED);
        assert_eq!(r.status, ExecStatus::Blocked);
        assert!(r.stdout.is_empty());
        assert_eq!(r.stderr, "blocked by policy: curl is not trusted");
    }

    #[test]
    fn status_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&ExecStatus::TimedOut).unwrap(),
            "\"timed-out\""
        );
        assert_eq!(ExecStatus::SpawnError.as_str(), "spawn-error");
    }
}
