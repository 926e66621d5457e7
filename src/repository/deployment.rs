use sqlx::Executor;

use crate::models::{Deployment, DeploymentStatus, DeploymentWithRelations, Product, Template, User};

pub struct DeploymentRepository;

impl DeploymentRepository {
    pub async fn find<'e, E>(executor: E, deployment_id: i64) -> Result<Option<Deployment>, sqlx::Error>
    where
        E: Executor<'e, Database = sqlx::Any>,
    {
        sqlx::query_as::<_, Deployment>(
            r#"SELECT id, user_id, domainname, deployment_uid, desired_template_id, applied_template_id,
                      user_values_json, status, generation, last_error, last_reconcile_at, created_at, deleted_at
               FROM deployment WHERE id = ?"#,
        )
        .bind(deployment_id)
        .fetch_optional(executor)
        .await
    }

    /// Same lookup as [`Self::find`], scoped to the caller's `user_id`: a
    /// deployment owned by a different user is indistinguishable from one
    /// that doesn't exist, per the write-path ownership scoping in §4.8.
    pub async fn find_for_user<'e, E>(executor: E, deployment_id: i64, user_id: i64) -> Result<Option<Deployment>, sqlx::Error>
    where
        E: Executor<'e, Database = sqlx::Any>,
    {
        sqlx::query_as::<_, Deployment>(
            r#"SELECT id, user_id, domainname, deployment_uid, desired_template_id, applied_template_id,
                      user_values_json, status, generation, last_error, last_reconcile_at, created_at, deleted_at
               FROM deployment WHERE id = ? AND user_id = ?"#,
        )
        .bind(deployment_id)
        .bind(user_id)
        .fetch_optional(executor)
        .await
    }

    /// Loads a deployment (including soft-deleted ones, needed by the
    /// reconciler's delete path) along with everything `create`/`update`
    /// validation and `get`/`list` need: user, desired template + its
    /// product, and the applied template if one is recorded. Takes a
    /// concrete connection (rather than a generic executor) because it
    /// issues several sequential queries over the same borrow.
    pub async fn find_with_relations(conn: &mut sqlx::AnyConnection, deployment_id: i64) -> Result<Option<DeploymentWithRelations>, sqlx::Error> {
        let Some(deployment) = Self::find(&mut *conn, deployment_id).await? else {
            return Ok(None);
        };

        let user = sqlx::query_as::<_, User>(r#"SELECT id, email, is_admin, created_at, deleted_at FROM "user" WHERE id = ?"#)
            .bind(deployment.user_id)
            .fetch_one(&mut *conn)
            .await?;

        let desired_template = sqlx::query_as::<_, Template>(
            r#"SELECT id, product_id, chart_ref, chart_version, chart_digest, version_label,
                      default_values_json, values_schema_json, capabilities_json,
                      health_timeout_sec, created_at, deleted_at
               FROM product_template_version WHERE id = ?"#,
        )
        .bind(deployment.desired_template_id)
        .fetch_one(&mut *conn)
        .await?;

        let desired_template_product = sqlx::query_as::<_, Product>(
            r#"SELECT id, name, description, canonical_template_id, created_at, deleted_at
               FROM product WHERE id = ?"#,
        )
        .bind(desired_template.product_id)
        .fetch_one(&mut *conn)
        .await?;

        let applied_template = match deployment.applied_template_id {
            None => None,
            Some(id) => sqlx::query_as::<_, Template>(
                r#"SELECT id, product_id, chart_ref, chart_version, chart_digest, version_label,
                          default_values_json, values_schema_json, capabilities_json,
                          health_timeout_sec, created_at, deleted_at
                   FROM product_template_version WHERE id = ?"#,
            )
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?,
        };

        Ok(Some(DeploymentWithRelations {
            deployment,
            user,
            desired_template,
            desired_template_product,
            applied_template,
        }))
    }

    pub async fn list<'e, E>(executor: E, user_id: Option<i64>, limit: i64) -> Result<Vec<Deployment>, sqlx::Error>
    where
        E: Executor<'e, Database = sqlx::Any>,
    {
        match user_id {
            Some(user_id) => {
                sqlx::query_as::<_, Deployment>(
                    r#"SELECT id, user_id, domainname, deployment_uid, desired_template_id, applied_template_id,
                              user_values_json, status, generation, last_error, last_reconcile_at, created_at, deleted_at
                       FROM deployment WHERE user_id = ? ORDER BY id LIMIT ?"#,
                )
                .bind(user_id)
                .bind(limit)
                .fetch_all(executor)
                .await
            }
            None => {
                sqlx::query_as::<_, Deployment>(
                    r#"SELECT id, user_id, domainname, deployment_uid, desired_template_id, applied_template_id,
                              user_values_json, status, generation, last_error, last_reconcile_at, created_at, deleted_at
                       FROM deployment ORDER BY id LIMIT ?"#,
                )
                .bind(limit)
                .fetch_all(executor)
                .await
            }
        }
    }

    pub async fn create<'e, E>(
        executor: E,
        user_id: i64,
        domainname: &str,
        deployment_uid: &str,
        desired_template_id: i64,
        user_values_json: Option<&serde_json::Value>,
    ) -> Result<Deployment, sqlx::Error>
    where
        E: Executor<'e, Database = sqlx::Any>,
    {
        sqlx::query_as::<_, Deployment>(
            r#"INSERT INTO deployment
                   (user_id, domainname, deployment_uid, desired_template_id, user_values_json, status, generation)
               VALUES (?, ?, ?, ?, ?, ?, 1)
               RETURNING id, user_id, domainname, deployment_uid, desired_template_id, applied_template_id,
                         user_values_json, status, generation, last_error, last_reconcile_at, created_at, deleted_at"#,
        )
        .bind(user_id)
        .bind(domainname)
        .bind(deployment_uid)
        .bind(desired_template_id)
        .bind(user_values_json)
        .bind(DeploymentStatus::Provisioning.to_string())
        .fetch_one(executor)
        .await
    }

    pub async fn set_desired_template<'e, E>(executor: E, deployment_id: i64, desired_template_id: i64) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = sqlx::Any>,
    {
        sqlx::query(
            r#"UPDATE deployment
               SET desired_template_id = ?, status = ?, generation = generation + 1, last_error = NULL
               WHERE id = ?"#,
        )
        .bind(desired_template_id)
        .bind(DeploymentStatus::Provisioning.to_string())
        .bind(deployment_id)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn mark_deleting<'e, E>(executor: E, deployment_id: i64) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = sqlx::Any>,
    {
        sqlx::query(
            r#"UPDATE deployment
               SET status = ?, generation = generation + 1, last_error = NULL, deleted_at = CURRENT_TIMESTAMP
               WHERE id = ?"#,
        )
        .bind(DeploymentStatus::Deleting.to_string())
        .bind(deployment_id)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Persists a reconcile outcome: the new status, the applied template
    /// (unchanged on the delete path), any error message, and the reconcile
    /// timestamp.
    pub async fn record_reconcile_outcome<'e, E>(
        executor: E,
        deployment_id: i64,
        status: DeploymentStatus,
        applied_template_id: Option<i64>,
        last_error: Option<&str>,
    ) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = sqlx::Any>,
    {
        sqlx::query(
            r#"UPDATE deployment
               SET status = ?, applied_template_id = COALESCE(?, applied_template_id),
                   last_error = ?, last_reconcile_at = CURRENT_TIMESTAMP
               WHERE id = ?"#,
        )
        .bind(status.to_string())
        .bind(applied_template_id)
        .bind(last_error)
        .bind(deployment_id)
        .execute(executor)
        .await?;
        Ok(())
    }
}
