//! Helm adapter: release lifecycle operations over the `helm` CLI.
//!
//! Mirrors the teacher's `cmd/helm.rs` shelling style. Values are written to
//! a temporary file per invocation (`tempfile::NamedTempFile`, removed on
//! drop on every exit path, including early returns and panics unwinding
//! through it) and passed with `--values`.

use std::io::Write;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::cmd::command::{CommandError, ErrorCategory, Runner};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelmReleaseOutcome {
    pub changed: bool,
    pub status: Option<String>,
    pub revision: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HelmReleaseStatus {
    pub exists: bool,
    pub status: Option<String>,
    pub revision: Option<i64>,
    pub raw: Option<Value>,
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum HelmError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("failed to write values file: {0}")]
    ValuesFile(String),

    #[error("malformed JSON from helm status for release {release}: {message}")]
    MalformedStatus { release: String, message: String },
}

impl HelmError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            HelmError::Command(err) => err.category(),
            // Neither a bad temp file nor unparseable JSON is transient.
            HelmError::ValuesFile(_) | HelmError::MalformedStatus { .. } => ErrorCategory::Fatal,
        }
    }
}

fn is_release_not_found(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("release: not found") || lower.contains("not found")
}

fn command_output_text(err: &CommandError) -> String {
    match err.output() {
        Some(out) => format!("{}\n{}", out.stderr, out.stdout),
        None => String::new(),
    }
}

/// `chart_ref@chart_digest` when a digest is pinned and the ref isn't
/// already digest-qualified; otherwise the ref unchanged.
fn resolve_chart_ref(chart_ref: &str, chart_digest: Option<&str>) -> String {
    match chart_digest {
        Some(digest) if !chart_ref.contains('@') => format!("{chart_ref}@{digest}"),
        _ => chart_ref.to_string(),
    }
}

#[derive(Deserialize)]
struct HelmStatusPayload {
    #[serde(default)]
    info: Option<HelmStatusInfo>,
    #[serde(default)]
    version: Option<i64>,
}

#[derive(Deserialize)]
struct HelmStatusInfo {
    #[serde(default)]
    status: Option<String>,
}

#[async_trait]
pub trait HelmAdapter: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn upgrade_install(
        &self,
        release: &str,
        namespace: &str,
        chart_ref: &str,
        chart_version: &str,
        chart_digest: Option<&str>,
        values: &Value,
        timeout_s: u32,
        atomic: bool,
        wait: bool,
    ) -> Result<HelmReleaseOutcome, HelmError>;

    async fn uninstall(&self, release: &str, namespace: &str, timeout_s: u32, wait: bool) -> Result<HelmReleaseOutcome, HelmError>;

    async fn get_release_status(&self, release: &str, namespace: &str) -> Result<HelmReleaseStatus, HelmError>;
}

pub struct HelmCliAdapter<R: Runner> {
    runner: R,
}

impl<R: Runner> HelmCliAdapter<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    fn write_values_file(values: &Value) -> Result<NamedTempFile, HelmError> {
        let mut file = NamedTempFile::new().map_err(|e| HelmError::ValuesFile(e.to_string()))?;
        let serialized = serde_json::to_vec(values).map_err(|e| HelmError::ValuesFile(e.to_string()))?;
        file.write_all(&serialized).map_err(|e| HelmError::ValuesFile(e.to_string()))?;
        file.flush().map_err(|e| HelmError::ValuesFile(e.to_string()))?;
        Ok(file)
    }
}

#[async_trait]
impl<R: Runner> HelmAdapter for HelmCliAdapter<R> {
    async fn upgrade_install(
        &self,
        release: &str,
        namespace: &str,
        chart_ref: &str,
        chart_version: &str,
        chart_digest: Option<&str>,
        values: &Value,
        timeout_s: u32,
        atomic: bool,
        wait: bool,
    ) -> Result<HelmReleaseOutcome, HelmError> {
        let values_file = Self::write_values_file(values)?;
        let values_path = values_file.path().to_string_lossy().into_owned();
        let resolved_chart = resolve_chart_ref(chart_ref, chart_digest);
        let timeout = format!("{timeout_s}s");

        let mut args: Vec<&str> = vec!["upgrade", "--install", release, resolved_chart.as_str(), "--namespace", namespace];
        if chart_digest.is_some() && !chart_ref.contains('@') {
            // Digest already pins the exact chart; omit --version.
        } else {
            args.push("--version");
            args.push(chart_version);
        }
        if resolved_chart.starts_with("oci://") {
            args.push("--plain-http");
        }
        args.push("--timeout");
        args.push(timeout.as_str());
        args.push("--values");
        args.push(values_path.as_str());
        if atomic {
            args.push("--atomic");
        }
        if wait {
            args.push("--wait");
        }

        self.runner.run("helm", &args)?;
        // `values_file` is dropped (and removed) here regardless of outcome.

        let status = self.get_release_status(release, namespace).await?;
        Ok(HelmReleaseOutcome {
            changed: true,
            status: status.status,
            revision: status.revision,
        })
    }

    async fn uninstall(&self, release: &str, namespace: &str, timeout_s: u32, wait: bool) -> Result<HelmReleaseOutcome, HelmError> {
        let timeout = format!("{timeout_s}s");
        let mut args: Vec<&str> = vec!["uninstall", release, "--namespace", namespace, "--timeout", timeout.as_str()];
        if wait {
            args.push("--wait");
        }

        match self.runner.run("helm", &args) {
            Ok(_) => Ok(HelmReleaseOutcome {
                changed: true,
                status: Some("uninstalled".to_string()),
                revision: None,
            }),
            Err(err) => {
                if is_release_not_found(&command_output_text(&err)) {
                    Ok(HelmReleaseOutcome {
                        changed: false,
                        status: Some("not-found".to_string()),
                        revision: None,
                    })
                } else {
                    Err(err.into())
                }
            }
        }
    }

    async fn get_release_status(&self, release: &str, namespace: &str) -> Result<HelmReleaseStatus, HelmError> {
        let output = match self.runner.run("helm", &["status", release, "--namespace", namespace, "--output", "json"]) {
            Ok(out) => out,
            Err(err) => {
                if is_release_not_found(&command_output_text(&err)) {
                    return Ok(HelmReleaseStatus {
                        exists: false,
                        status: None,
                        revision: None,
                        raw: None,
                    });
                }
                return Err(err.into());
            }
        };

        let raw: Value = serde_json::from_str(&output.stdout).map_err(|e| HelmError::MalformedStatus {
            release: release.to_string(),
            message: e.to_string(),
        })?;
        let payload: HelmStatusPayload = serde_json::from_value(raw.clone()).map_err(|e| HelmError::MalformedStatus {
            release: release.to_string(),
            message: e.to_string(),
        })?;

        Ok(HelmReleaseStatus {
            exists: true,
            status: payload.info.and_then(|i| i.status),
            revision: payload.version,
            raw: Some(raw),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_chart_ref_appends_digest_when_absent() {
        assert_eq!(resolve_chart_ref("oci://example/chart", Some("sha256:abc")), "oci://example/chart@sha256:abc");
    }

    #[test]
    fn resolve_chart_ref_keeps_existing_digest() {
        assert_eq!(resolve_chart_ref("oci://example/chart@sha256:def", Some("sha256:abc")), "oci://example/chart@sha256:def");
    }

    #[test]
    fn resolve_chart_ref_without_digest_is_unchanged() {
        assert_eq!(resolve_chart_ref("oci://example/chart", None), "oci://example/chart");
    }

    #[test]
    fn release_not_found_matches_lowercase_text() {
        assert!(is_release_not_found("Error: release: not found"));
        assert!(is_release_not_found("Error: uninstall: Release not found"));
        assert!(!is_release_not_found("Error: something else"));
    }
}
