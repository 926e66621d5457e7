//! End-to-end scenarios over an in-memory SQLite pool: the fast path a
//! boundary layer would exercise, driven through `DeploymentService` and a
//! one-shot `reconciler::reconcile_once` call with fake adapters standing
//! in for `kubectl`/`helm`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use deploy_engine::cmd::helm::{HelmAdapter, HelmError, HelmReleaseOutcome, HelmReleaseStatus};
use deploy_engine::cmd::kubectl::{KubeAdapter, KubeError, NamespaceOutcome};
use deploy_engine::db::{Backend, Database};
use deploy_engine::errors::EngineError;
use deploy_engine::reconciler::{reconcile_once, ProvisionerHandle};
use deploy_engine::repository::{ProductRepository, TemplateRepository, UserRepository};
use deploy_engine::service::DeploymentService;
use serde_json::{json, Value};
use sqlx::AnyPool;

struct RecordingKube {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl KubeAdapter for RecordingKube {
    async fn ensure_namespace(&self, name: &str) -> Result<NamespaceOutcome, KubeError> {
        self.calls.lock().unwrap().push(format!("ensure_namespace:{name}"));
        Ok(NamespaceOutcome { exists: true, changed: true })
    }

    async fn delete_namespace(&self, name: &str) -> Result<NamespaceOutcome, KubeError> {
        self.calls.lock().unwrap().push(format!("delete_namespace:{name}"));
        Ok(NamespaceOutcome { exists: false, changed: true })
    }

    async fn namespace_exists(&self, _name: &str) -> Result<bool, KubeError> {
        Ok(true)
    }

    async fn namespace_terminating(&self, _name: &str) -> Result<bool, KubeError> {
        Ok(false)
    }
}

struct RecordingHelm {
    last_values: Mutex<Option<Value>>,
}

#[async_trait]
impl HelmAdapter for RecordingHelm {
    async fn upgrade_install(
        &self,
        _release: &str,
        _namespace: &str,
        _chart_ref: &str,
        _chart_version: &str,
        _chart_digest: Option<&str>,
        values: &Value,
        _timeout_s: u32,
        _atomic: bool,
        _wait: bool,
    ) -> Result<HelmReleaseOutcome, HelmError> {
        *self.last_values.lock().unwrap() = Some(values.clone());
        Ok(HelmReleaseOutcome { changed: true, status: Some("deployed".to_string()), revision: Some(1) })
    }

    async fn uninstall(&self, _release: &str, _namespace: &str, _timeout_s: u32, _wait: bool) -> Result<HelmReleaseOutcome, HelmError> {
        Ok(HelmReleaseOutcome { changed: true, status: Some("uninstalled".to_string()), revision: None })
    }

    async fn get_release_status(&self, _release: &str, _namespace: &str) -> Result<HelmReleaseStatus, HelmError> {
        Ok(HelmReleaseStatus { exists: true, status: Some("deployed".to_string()), revision: Some(1), raw: None })
    }
}

async fn setup() -> AnyPool {
    let database = Database::connect("sqlite::memory:").await.unwrap();
    database.migrate().await.unwrap();
    database.pool
}

async fn seed_user_product_template(pool: &AnyPool, chart_version: &str) -> (i64, i64, i64) {
    let user = UserRepository::create(pool, "u@example.com", false).await.unwrap();
    let product = ProductRepository::create(pool, "hello", None).await.unwrap();
    let schema = json!({
        "type": "object",
        "properties": {"user": {"type": "object", "properties": {"message": {"type": "string"}}, "additionalProperties": false}}
    });
    let template = TemplateRepository::create(
        pool,
        product.id,
        "oci://example/chart",
        chart_version,
        None,
        None,
        None,
        Some(&schema),
        None,
        None,
    )
    .await
    .unwrap();
    (user.id, product.id, template.id)
}

#[tokio::test]
async fn create_reconcile_ready() {
    let pool = setup().await;
    let (user_id, _product_id, template_id) = seed_user_product_template(&pool, "1.0.0").await;

    let deployment = DeploymentService::create(&pool, user_id, template_id, "a.test", Some(&json!({"message": "hi"}))).await.unwrap();

    let helm = Arc::new(RecordingHelm { last_values: Mutex::new(None) });
    let kube = Arc::new(RecordingKube { calls: Mutex::new(vec![]) });
    let provisioner = ProvisionerHandle::new(kube, helm.clone());

    let claimed = reconcile_once(&pool, Backend::Sqlite, "worker-1", &provisioner).await.unwrap();
    assert!(claimed);

    let reloaded = DeploymentService::get(&pool, deployment.id).await.unwrap();
    assert_eq!(reloaded.deployment.status, "ready");
    assert_eq!(reloaded.deployment.applied_template_id, Some(template_id));

    let sent_values = helm.last_values.lock().unwrap().clone().unwrap();
    assert_eq!(sent_values, json!({"user": {"message": "hi"}}));
}

#[tokio::test]
async fn downgrade_rejection() {
    let pool = setup().await;
    let (user_id, product_id, t1) = seed_user_product_template(&pool, "1.0.0").await;
    let t2 = TemplateRepository::create(&pool, product_id, "oci://example/chart", "2.0.0", None, None, None, None, None, None)
        .await
        .unwrap();

    let deployment = DeploymentService::create(&pool, user_id, t2.id, "b.test", None).await.unwrap();

    let err = DeploymentService::update(&pool, deployment.id, user_id, t1).await.unwrap_err();
    assert!(matches!(err, EngineError::Integrity(_)));

    let reloaded = DeploymentService::get(&pool, deployment.id).await.unwrap();
    assert_eq!(reloaded.deployment.desired_template_id, t2.id);
}

#[tokio::test]
async fn cross_product_upgrade_rejection() {
    let pool = setup().await;
    let (user_id, _product_a, template_a) = seed_user_product_template(&pool, "1.0.0").await;
    let product_b = ProductRepository::create(&pool, "other", None).await.unwrap();
    let template_b = TemplateRepository::create(&pool, product_b.id, "oci://example/other", "1.0.0", None, None, None, None, None, None)
        .await
        .unwrap();
    assert!(template_b.id > template_a);

    let deployment = DeploymentService::create(&pool, user_id, template_a, "c.test", None).await.unwrap();
    let err = DeploymentService::update(&pool, deployment.id, user_id, template_b.id).await.unwrap_err();
    assert!(matches!(err, EngineError::Integrity(_)));
}

#[tokio::test]
async fn open_job_collision_rolls_back() {
    let pool = setup().await;
    let (user_id, product_id, template_id) = seed_user_product_template(&pool, "1.0.0").await;
    let next_template = TemplateRepository::create(&pool, product_id, "oci://example/chart", "2.0.0", None, None, None, None, None, None)
        .await
        .unwrap();

    let deployment = DeploymentService::create(&pool, user_id, template_id, "d.test", None).await.unwrap();

    // The create job is still queued, so a second write attempt collides.
    let err = DeploymentService::update(&pool, deployment.id, user_id, next_template.id).await.unwrap_err();
    assert!(matches!(err, EngineError::DeploymentInProgress));

    let reloaded = DeploymentService::get(&pool, deployment.id).await.unwrap();
    assert_eq!(reloaded.deployment.desired_template_id, template_id);
}

#[tokio::test]
async fn delete_is_idempotent() {
    let pool = setup().await;
    let (user_id, _product_id, template_id) = seed_user_product_template(&pool, "1.0.0").await;
    let deployment = DeploymentService::create(&pool, user_id, template_id, "e.test", None).await.unwrap();

    let helm = Arc::new(RecordingHelm { last_values: Mutex::new(None) });
    let kube = Arc::new(RecordingKube { calls: Mutex::new(vec![]) });
    let provisioner = ProvisionerHandle::new(kube, helm);
    reconcile_once(&pool, Backend::Sqlite, "worker-1", &provisioner).await.unwrap();

    DeploymentService::delete(&pool, deployment.id, user_id).await.unwrap();
    DeploymentService::delete(&pool, deployment.id, user_id).await.unwrap();

    let jobs = deploy_engine::queue::QueueRepository::list_jobs(&pool, None, Some(deployment.id), 10).await.unwrap();
    let delete_jobs = jobs.iter().filter(|j| j.reason == "delete").count();
    assert_eq!(delete_jobs, 1);

    reconcile_once(&pool, Backend::Sqlite, "worker-1", &provisioner).await.unwrap();
    let reloaded = DeploymentService::get(&pool, deployment.id).await.unwrap();
    assert_eq!(reloaded.deployment.status, "deleted");
}

#[tokio::test]
async fn parallel_claim_safety() {
    let pool = setup().await;
    let (user_id, _product_id, template_id) = seed_user_product_template(&pool, "1.0.0").await;

    for i in 0..8 {
        DeploymentService::create(&pool, user_id, template_id, &format!("host-{i}.test"), None).await.unwrap();
    }

    let claimed_count = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for _ in 0..16 {
        let pool = pool.clone();
        let claimed_count = claimed_count.clone();
        handles.push(tokio::spawn(async move {
            let job = deploy_engine::queue::QueueRepository::claim_next(&pool, Backend::Sqlite, "w").await.unwrap();
            if job.is_some() {
                claimed_count.fetch_add(1, Ordering::SeqCst);
            }
            job
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        if let Some(job) = handle.await.unwrap() {
            ids.push(job.id);
        }
    }

    assert_eq!(claimed_count.load(Ordering::SeqCst), 8);
    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 8);
}
