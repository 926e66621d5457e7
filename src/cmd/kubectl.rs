//! Kube adapter: idempotent namespace lifecycle operations over `kubectl`.
//!
//! Mirrors the teacher's `cmd/kubectl.rs` wrapping style (shell out, parse
//! text output) but narrowed to the namespace operations this engine needs.
//! "Not found" in stderr/stdout is translated into a success (absent)
//! outcome here, never propagated as an error — per the adapter contract.

use async_trait::async_trait;
use tracing::info;

use crate::cmd::command::{CommandError, ErrorCategory, Runner};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceOutcome {
    pub exists: bool,
    pub changed: bool,
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum KubeError {
    #[error(transparent)]
    Command(#[from] CommandError),
}

impl KubeError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            KubeError::Command(err) => err.category(),
        }
    }
}

fn is_not_found(output: &str) -> bool {
    output.to_lowercase().contains("not found")
}

/// Idempotent wrapper around `kubectl` namespace operations.
#[async_trait]
pub trait KubeAdapter: Send + Sync {
    async fn ensure_namespace(&self, name: &str) -> Result<NamespaceOutcome, KubeError>;
    async fn delete_namespace(&self, name: &str) -> Result<NamespaceOutcome, KubeError>;
    async fn namespace_exists(&self, name: &str) -> Result<bool, KubeError>;
    async fn namespace_terminating(&self, name: &str) -> Result<bool, KubeError>;
}

/// `kubectl`-backed implementation, shelling out through a [`Runner`].
pub struct KubectlAdapter<R: Runner> {
    runner: R,
}

impl<R: Runner> KubectlAdapter<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl<R: Runner> KubeAdapter for KubectlAdapter<R> {
    async fn ensure_namespace(&self, name: &str) -> Result<NamespaceOutcome, KubeError> {
        if self.namespace_exists(name).await? {
            return Ok(NamespaceOutcome { exists: true, changed: false });
        }

        match self.runner.run("kubectl", &["create", "namespace", name]) {
            Ok(_) => {
                info!("created namespace {name}");
                Ok(NamespaceOutcome { exists: true, changed: true })
            }
            Err(err) => {
                let combined = command_output_text(&err);
                if is_not_found(&combined) {
                    // Created-then-raced-away is not a realistic outcome for
                    // create; treat any "already exists" noise as success.
                    Ok(NamespaceOutcome { exists: true, changed: false })
                } else {
                    Err(err.into())
                }
            }
        }
    }

    async fn delete_namespace(&self, name: &str) -> Result<NamespaceOutcome, KubeError> {
        match self.runner.run("kubectl", &["delete", "namespace", name, "--ignore-not-found=true"]) {
            Ok(_) => Ok(NamespaceOutcome { exists: false, changed: true }),
            Err(err) => {
                let combined = command_output_text(&err);
                if is_not_found(&combined) {
                    Ok(NamespaceOutcome { exists: false, changed: false })
                } else {
                    Err(err.into())
                }
            }
        }
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool, KubeError> {
        match self.runner.run("kubectl", &["get", "namespace", name, "-o", "name"]) {
            Ok(_) => Ok(true),
            Err(err) => {
                let combined = command_output_text(&err);
                if is_not_found(&combined) {
                    Ok(false)
                } else {
                    Err(err.into())
                }
            }
        }
    }

    async fn namespace_terminating(&self, name: &str) -> Result<bool, KubeError> {
        match self
            .runner
            .run("kubectl", &["get", "namespace", name, "-o", "jsonpath={.status.phase}"])
        {
            Ok(out) => Ok(out.stdout.trim().eq_ignore_ascii_case("terminating")),
            Err(err) => {
                let combined = command_output_text(&err);
                if is_not_found(&combined) {
                    Ok(false)
                } else {
                    Err(err.into())
                }
            }
        }
    }
}

fn command_output_text(err: &CommandError) -> String {
    match err.output() {
        Some(out) => format!("{}\n{}", out.stderr, out.stdout),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::command::CommandOutput;
    use std::sync::Mutex;

    struct FakeRunner {
        responses: Mutex<Vec<Result<CommandOutput, CommandError>>>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl FakeRunner {
        fn new(responses: Vec<Result<CommandOutput, CommandError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(vec![]),
            }
        }
    }

    impl Runner for FakeRunner {
        fn run(&self, binary: &str, args: &[&str]) -> Result<CommandOutput, CommandError> {
            let mut argv = vec![binary.to_string()];
            argv.extend(args.iter().map(|a| a.to_string()));
            self.calls.lock().unwrap().push(argv);
            self.responses.lock().unwrap().remove(0)
        }
    }

    fn ok(stdout: &str) -> Result<CommandOutput, CommandError> {
        Ok(CommandOutput {
            argv: vec![],
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }

    fn not_found_err() -> Result<CommandOutput, CommandError> {
        let output = CommandOutput {
            argv: vec![],
            exit_code: 1,
            stdout: String::new(),
            stderr: "Error from server (NotFound): namespaces \"x\" not found".to_string(),
        };
        Err(CommandError::Failed {
            argv: output.argv.clone(),
            exit_code: 1,
            category: ErrorCategory::Fatal,
            detail: output.stderr.clone(),
            output,
        })
    }

    #[tokio::test]
    async fn ensure_namespace_creates_when_absent() {
        let runner = FakeRunner::new(vec![not_found_err(), ok("")]);
        let adapter = KubectlAdapter::new(runner);
        let outcome = adapter.ensure_namespace("ns-a").await.unwrap();
        assert_eq!(outcome, NamespaceOutcome { exists: true, changed: true });
    }

    #[tokio::test]
    async fn ensure_namespace_is_idempotent_when_present() {
        let runner = FakeRunner::new(vec![ok("namespace/ns-a")]);
        let adapter = KubectlAdapter::new(runner);
        let outcome = adapter.ensure_namespace("ns-a").await.unwrap();
        assert_eq!(outcome, NamespaceOutcome { exists: true, changed: false });
    }

    #[tokio::test]
    async fn delete_namespace_not_found_is_not_an_error() {
        let runner = FakeRunner::new(vec![not_found_err()]);
        let adapter = KubectlAdapter::new(runner);
        let outcome = adapter.delete_namespace("ns-a").await.unwrap();
        assert_eq!(outcome, NamespaceOutcome { exists: false, changed: false });
    }

    #[tokio::test]
    async fn namespace_terminating_reads_phase() {
        let runner = FakeRunner::new(vec![ok("Terminating")]);
        let adapter = KubectlAdapter::new(runner);
        assert!(adapter.namespace_terminating("ns-a").await.unwrap());
    }
}
