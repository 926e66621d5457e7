//! Reconciler: the sole error recovery point. One claimed job drives one
//! apply-or-delete cycle against the injected kube/helm adapters; every
//! error raised during that cycle is caught here, recorded on the
//! deployment, and turned into either a requeue (retryable) or a terminal
//! job failure (fatal).
//!
//! `ProvisionerHandle` is the redesign of the teacher's global provisioner
//! singleton into an injected dependency: tests construct one from fake
//! adapters instead of standing up real `kubectl`/`helm` processes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::AnyPool;

use crate::cmd::helm::HelmAdapter;
use crate::cmd::kubectl::KubeAdapter;
use crate::db::Backend;
use crate::errors::EngineError;
use crate::models::{DeploymentStatus, DeploymentWithRelations, ReconcileJob};
use crate::queue::QueueRepository;
use crate::repository::DeploymentRepository;
use crate::values::{merge_values_scoped, validate_merged_values, validate_user_values};

/// The injected bundle of provisioning operations the reconciler depends
/// on, replacing a global provisioner singleton.
#[derive(Clone)]
pub struct ProvisionerHandle {
    pub kube: Arc<dyn KubeAdapter>,
    pub helm: Arc<dyn HelmAdapter>,
}

impl ProvisionerHandle {
    pub fn new(kube: Arc<dyn KubeAdapter>, helm: Arc<dyn HelmAdapter>) -> Self {
        Self { kube, helm }
    }
}

const BASE_BACKOFF_SECS: i64 = 10;
const MAX_BACKOFF_SECS: i64 = 600;

fn backoff_seconds(attempt: i32) -> i64 {
    let exp = attempt.clamp(0, 10) as u32;
    (BASE_BACKOFF_SECS.saturating_mul(1i64 << exp)).min(MAX_BACKOFF_SECS)
}

/// One claim-and-reconcile iteration. Returns `Ok(true)` if a job was
/// claimed and processed, `Ok(false)` if the queue was empty.
pub async fn reconcile_once(pool: &AnyPool, backend: Backend, worker_id: &str, provisioner: &ProvisionerHandle) -> Result<bool, sqlx::Error> {
    let Some(job) = QueueRepository::claim_next(pool, backend, worker_id).await? else {
        return Ok(false);
    };

    run_job(pool, &job, provisioner).await;
    Ok(true)
}

async fn run_job(pool: &AnyPool, job: &ReconcileJob, provisioner: &ProvisionerHandle) {
    match try_reconcile(pool, job.deployment_id, provisioner).await {
        Ok(()) => {
            if let Err(err) = QueueRepository::mark_done(pool, job.id).await {
                error!(job_id = job.id, %err, "failed to mark reconcile job done");
            }
        }
        Err(outcome_err) => {
            let message = outcome_err.to_string();
            if let Err(err) = DeploymentRepository::record_reconcile_outcome(pool, job.deployment_id, DeploymentStatus::Error, None, Some(&message)).await {
                error!(deployment_id = job.deployment_id, %err, "failed to persist reconcile error outcome");
            }

            if outcome_err.is_retryable() {
                let run_after = Utc::now() + chrono::Duration::seconds(backoff_seconds(job.attempt));
                if let Err(err) = QueueRepository::requeue(pool, job.id, &message, run_after).await {
                    error!(job_id = job.id, %err, "failed to requeue reconcile job");
                }
            } else if let Err(err) = QueueRepository::mark_failed(pool, job.id, &message).await {
                error!(job_id = job.id, %err, "failed to mark reconcile job failed");
            }
        }
    }
}

async fn try_reconcile(pool: &AnyPool, deployment_id: i64, provisioner: &ProvisionerHandle) -> Result<(), EngineError> {
    let mut conn = pool.acquire().await?;
    let with_relations = DeploymentRepository::find_with_relations(&mut *conn, deployment_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("deployment {deployment_id}")))?;
    drop(conn);

    validate_inputs(&with_relations)?;

    let outcome = if with_relations.deployment.deleted_at.is_some() {
        delete_path(&with_relations, provisioner).await
    } else {
        apply_path(&with_relations, provisioner).await
    }?;

    DeploymentRepository::record_reconcile_outcome(pool, deployment_id, outcome.status, outcome.applied_template_id, None).await?;
    Ok(())
}

fn validate_inputs(rel: &DeploymentWithRelations) -> Result<(), EngineError> {
    if rel.deployment.deployment_uid.trim().is_empty() {
        return Err(EngineError::Integrity("deployment_uid is empty".to_string()));
    }
    if rel.desired_template.deleted_at.is_some() {
        return Err(EngineError::Integrity("desired template is deleted".to_string()));
    }
    if rel.desired_template.chart_ref.trim().is_empty() || rel.desired_template.chart_version.trim().is_empty() {
        return Err(EngineError::Integrity("template is missing chart_ref/chart_version".to_string()));
    }
    Ok(())
}

struct ReconcileOutcome {
    status: DeploymentStatus,
    applied_template_id: Option<i64>,
}

async fn apply_path(rel: &DeploymentWithRelations, provisioner: &ProvisionerHandle) -> Result<ReconcileOutcome, EngineError> {
    let identity = rel.deployment.deployment_uid.as_str();

    validate_user_values(rel.deployment.user_values_json.as_ref(), rel.desired_template.values_schema_json.as_ref())?;
    let merged = merge_values_scoped(
        rel.desired_template.default_values_json.as_ref(),
        rel.deployment.user_values_json.as_ref(),
        None,
    )?;
    validate_merged_values(&merged, rel.desired_template.values_schema_json.as_ref())?;

    provisioner.kube.ensure_namespace(identity).await?;

    let timeout_s = rel.desired_template.health_timeout_sec_or_default();

    provisioner
        .helm
        .upgrade_install(
            identity,
            identity,
            &rel.desired_template.chart_ref,
            &rel.desired_template.chart_version,
            rel.desired_template.chart_digest.as_deref(),
            &merged,
            timeout_s,
            true,
            true,
        )
        .await?;

    Ok(ReconcileOutcome {
        status: DeploymentStatus::Ready,
        applied_template_id: Some(rel.deployment.desired_template_id),
    })
}

async fn delete_path(rel: &DeploymentWithRelations, provisioner: &ProvisionerHandle) -> Result<ReconcileOutcome, EngineError> {
    let identity = rel.deployment.deployment_uid.as_str();
    let timeout_s = rel.desired_template.health_timeout_sec_or_default();

    provisioner.helm.uninstall(identity, identity, timeout_s, true).await?;
    provisioner.kube.delete_namespace(identity).await?;

    Ok(ReconcileOutcome {
        status: DeploymentStatus::Deleted,
        applied_template_id: None,
    })
}

/// Spawns a worker loop that claims and reconciles jobs until cancelled.
pub async fn run_worker(pool: AnyPool, backend: Backend, worker_id: String, provisioner: ProvisionerHandle, poll_interval: Duration) {
    loop {
        match reconcile_once(&pool, backend, &worker_id, &provisioner).await {
            Ok(true) => continue,
            Ok(false) => tokio::time::sleep(poll_interval).await,
            Err(err) => {
                error!(worker_id = %worker_id, %err, "reconcile loop error, backing off");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}

/// Spawns a periodic lease-recovery sweep: requeues jobs whose `locked_at`
/// is older than `lease_threshold`.
pub async fn run_lease_recovery_sweep(pool: AnyPool, lease_threshold: Duration, sweep_interval: Duration) {
    loop {
        tokio::time::sleep(sweep_interval).await;
        let now = Utc::now();
        let cutoff = now - chrono::Duration::from_std(lease_threshold).unwrap_or_default();
        match QueueRepository::recover_stale(&pool, cutoff, now).await {
            Ok(0) => {}
            Ok(n) => info!(recovered = n, "lease recovery sweep requeued stale jobs"),
            Err(err) => error!(%err, "lease recovery sweep failed"),
        }
    }
}
