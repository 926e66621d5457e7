//! Process runner: executes an external command and classifies failures.
//!
//! Grounded on the teacher engine's `QoveryCommand`/`ExecutableCommand` pair
//! (a thin wrapper around `std::process::Command` with an injectable runner
//! for tests), narrowed to what the kube/helm adapters need: run to
//! completion, capture stdout/stderr/exit, and classify a non-zero exit as
//! retryable or fatal.

use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// Full argv, plus the process's outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub argv: Vec<String>,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Whether an external tool failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Retryable,
    Fatal,
}

const RETRYABLE_PATTERNS: &[&str] = &[
    "timed out",
    "timeout",
    "temporarily unavailable",
    "connection refused",
    "connection reset",
    "i/o timeout",
    "tls handshake timeout",
    "context deadline exceeded",
    "unable to connect",
    "too many requests",
    "rate limit",
];

/// Classify a command failure from its exit code and combined output.
///
/// A negative exit code means the process was terminated by a signal; the
/// teacher's kill-on-timeout path produces exactly that shape, so it is
/// treated the same way here: retryable.
pub fn classify_error(exit_code: i32, stdout: &str, stderr: &str) -> ErrorCategory {
    if exit_code < 0 {
        return ErrorCategory::Retryable;
    }
    let haystack = format!("{stderr}\n{stdout}").to_lowercase();
    if RETRYABLE_PATTERNS.iter().any(|pattern| haystack.contains(pattern)) {
        ErrorCategory::Retryable
    } else {
        ErrorCategory::Fatal
    }
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum CommandError {
    #[error("failed to spawn command {argv:?}: {message}")]
    Spawn { argv: Vec<String>, message: String },

    #[error("command {argv:?} exited with status {exit_code} (category={category:?}): {detail}")]
    Failed {
        argv: Vec<String>,
        exit_code: i32,
        category: ErrorCategory,
        detail: String,
        output: CommandOutput,
    },
}

impl CommandError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CommandError::Spawn { .. } => ErrorCategory::Retryable,
            CommandError::Failed { category, .. } => *category,
        }
    }

    pub fn output(&self) -> Option<&CommandOutput> {
        match self {
            CommandError::Spawn { .. } => None,
            CommandError::Failed { output, .. } => Some(output),
        }
    }
}

fn truncated_detail(stderr: &str, stdout: &str) -> String {
    let detail = if !stderr.trim().is_empty() { stderr.trim() } else { stdout.trim() };
    if detail.len() > 400 {
        format!("{}...", &detail[..397])
    } else {
        detail.to_string()
    }
}

/// A single command invocation, implemented over `std::process::Command`.
///
/// Injectable for tests: callers that need to avoid spawning real processes
/// should depend on the [`Runner`] trait instead of this type directly.
pub struct ProcessRunner;

/// Runs a fixed argument vector to completion and returns its result.
///
/// Implementations must be idempotent with respect to retries: the runner
/// itself never retries, it only reports.
pub trait Runner: Send + Sync {
    fn run(&self, binary: &str, args: &[&str]) -> Result<CommandOutput, CommandError>;
}

impl Runner for ProcessRunner {
    fn run(&self, binary: &str, args: &[&str]) -> Result<CommandOutput, CommandError> {
        let argv: Vec<String> = std::iter::once(binary.to_string())
            .chain(args.iter().map(|a| a.to_string()))
            .collect();

        debug!("exec: {}", argv.join(" "));

        let output = Command::new(binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|err| CommandError::Spawn {
                argv: argv.clone(),
                message: err.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        // Negative codes are our own convention for "terminated by signal";
        // std reports that case as `None`, not a real exit code.
        let exit_code = output.status.code().unwrap_or(-1);

        let result = CommandOutput {
            argv: argv.clone(),
            exit_code,
            stdout,
            stderr,
        };

        if !result.success() {
            let category = classify_error(exit_code, &result.stdout, &result.stderr);
            warn!("command {} failed with status {} ({:?})", argv.join(" "), exit_code, category);
            return Err(CommandError::Failed {
                argv,
                exit_code,
                category,
                detail: truncated_detail(&result.stderr, &result.stdout),
                output: result,
            });
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_signal_termination_as_retryable() {
        assert_eq!(classify_error(-1, "", ""), ErrorCategory::Retryable);
    }

    #[test]
    fn classifies_known_transient_patterns_as_retryable() {
        for pattern in RETRYABLE_PATTERNS {
            assert_eq!(
                classify_error(1, "", &format!("boom: {pattern}")),
                ErrorCategory::Retryable,
                "pattern {pattern} should be retryable"
            );
        }
    }

    #[test]
    fn classifies_unknown_failures_as_fatal() {
        assert_eq!(classify_error(1, "", "no such chart version"), ErrorCategory::Fatal);
    }

    #[test]
    fn classification_is_case_insensitive() {
        assert_eq!(classify_error(1, "", "CONNECTION RESET by peer"), ErrorCategory::Retryable);
    }

    #[test]
    fn runner_captures_successful_output() {
        let runner = ProcessRunner;
        let out = runner.run("sh", &["-c", "echo hello"]).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn runner_reports_non_zero_exit() {
        let runner = ProcessRunner;
        let err = runner.run("sh", &["-c", "exit 3"]).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Fatal);
        match err {
            CommandError::Failed { exit_code, .. } => assert_eq!(exit_code, 3),
            _ => panic!("expected Failed"),
        }
    }

    #[test]
    fn runner_reports_spawn_failure_for_missing_binary() {
        let runner = ProcessRunner;
        let err = runner.run("definitely-not-a-real-binary-xyz", &[]).unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }
}
