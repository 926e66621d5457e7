//! Deployment service: the write-path operations a boundary layer (HTTP/CLI)
//! calls into. Every method runs inside one `sqlx` transaction and rolls
//! back on any failure, per the repository pack's `ProjectRepository`
//! pattern of thin associated functions taking a pool/executor, generalized
//! here to own the transaction itself rather than leaving that to callers.

use sqlx::AnyPool;

use crate::errors::EngineError;
use crate::models::{Deployment, DeploymentStatus, DeploymentWithRelations, JobReason};
use crate::naming::generate_deployment_uid;
use crate::queue::QueueRepository;
use crate::repository::{DeploymentRepository, ProductRepository, TemplateRepository, UserRepository};
use crate::values::{merge_values_scoped, validate_merged_values, validate_user_values};

pub struct DeploymentService;

impl DeploymentService {
    pub async fn create(
        pool: &AnyPool,
        user_id: i64,
        desired_template_id: i64,
        domainname: &str,
        user_values: Option<&serde_json::Value>,
    ) -> Result<Deployment, EngineError> {
        let mut tx = pool.begin().await?;

        let user = UserRepository::find_active(&mut *tx, user_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("user {user_id}")))?;

        let template = TemplateRepository::find_active(&mut *tx, desired_template_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("template {desired_template_id}")))?;

        let product = ProductRepository::find_active(&mut *tx, template.product_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("product {}", template.product_id)))?;

        validate_user_values(user_values, template.values_schema_json.as_ref())?;
        let merged = merge_values_scoped(template.default_values_json.as_ref(), user_values, None)?;
        validate_merged_values(&merged, template.values_schema_json.as_ref())?;

        let deployment_uid = generate_deployment_uid(&product.name, &user.email)
            .map_err(|e| EngineError::Integrity(e.to_string()))?;

        let deployment = DeploymentRepository::create(&mut *tx, user_id, domainname, &deployment_uid, desired_template_id, user_values).await?;

        QueueRepository::enqueue(&mut *tx, deployment.id, JobReason::Create).await?;

        tx.commit().await?;
        Ok(deployment)
    }

    pub async fn update(pool: &AnyPool, deployment_id: i64, user_id: i64, desired_template_id: i64) -> Result<Deployment, EngineError> {
        let mut tx = pool.begin().await?;

        // Scoped by user_id: a deployment owned by someone else 404s here
        // rather than being mutated, per the write-path ownership rule in §4.8.
        let deployment = DeploymentRepository::find_for_user(&mut *tx, deployment_id, user_id)
            .await?
            .filter(|d| d.deleted_at.is_none())
            .ok_or_else(|| EngineError::NotFound(format!("deployment {deployment_id}")))?;

        if desired_template_id <= deployment.desired_template_id {
            return Err(EngineError::Integrity("update must target a strictly greater template id (upgrade-only)".to_string()));
        }

        let current_template = TemplateRepository::find_active(&mut *tx, deployment.desired_template_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("template {}", deployment.desired_template_id)))?;

        let target_template = TemplateRepository::find_active(&mut *tx, desired_template_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("template {desired_template_id}")))?;

        if target_template.product_id != current_template.product_id {
            return Err(EngineError::Integrity("update must target a template in the same product".to_string()));
        }

        validate_user_values(deployment.user_values_json.as_ref(), target_template.values_schema_json.as_ref())?;
        let merged = merge_values_scoped(target_template.default_values_json.as_ref(), deployment.user_values_json.as_ref(), None)?;
        validate_merged_values(&merged, target_template.values_schema_json.as_ref())?;

        DeploymentRepository::set_desired_template(&mut *tx, deployment_id, desired_template_id).await?;
        QueueRepository::enqueue(&mut *tx, deployment_id, JobReason::Update).await?;

        tx.commit().await?;
        DeploymentRepository::find(pool, deployment_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("deployment {deployment_id}")))
    }

    /// Idempotent: already-deleting or already-deleted deployments are a
    /// no-op success with no additional job enqueued.
    pub async fn delete(pool: &AnyPool, deployment_id: i64, user_id: i64) -> Result<(), EngineError> {
        let mut tx = pool.begin().await?;

        let deployment = DeploymentRepository::find_for_user(&mut *tx, deployment_id, user_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("deployment {deployment_id}")))?;

        if matches!(deployment.status_enum(), Some(DeploymentStatus::Deleting) | Some(DeploymentStatus::Deleted)) {
            tx.commit().await?;
            return Ok(());
        }

        DeploymentRepository::mark_deleting(&mut *tx, deployment_id).await?;
        QueueRepository::enqueue(&mut *tx, deployment_id, JobReason::Delete).await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get(pool: &AnyPool, deployment_id: i64) -> Result<DeploymentWithRelations, EngineError> {
        let mut conn = pool.acquire().await?;
        DeploymentRepository::find_with_relations(&mut *conn, deployment_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("deployment {deployment_id}")))
    }

    pub async fn list(pool: &AnyPool, user_id: Option<i64>, limit: i64) -> Result<Vec<Deployment>, EngineError> {
        Ok(DeploymentRepository::list(pool, user_id, limit).await?)
    }
}
