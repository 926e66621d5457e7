//! Reconcile job queue: enqueue, claim, and terminal/retry transitions.
//!
//! The claim strategy is the one place that genuinely differs between
//! Postgres and SQLite (`FOR UPDATE SKIP LOCKED` vs. a scalar-subquery
//! `UPDATE ... RETURNING`); the [`Backend`] detected once at pool
//! construction (`crate::db::Backend`) selects it, rather than branching on
//! every call.

use sqlx::{Any, AnyPool, Executor};

use crate::db::Backend;
use crate::errors::EngineError;
use crate::models::{JobReason, JobStatus, ReconcileJob};

pub struct QueueRepository;

impl QueueRepository {
    /// Inserts a `queued` job. A violation of the one-open-job-per-deployment
    /// index is translated to [`EngineError::DeploymentInProgress`] rather
    /// than the generic integrity mapping, per the queue contract.
    pub async fn enqueue<'e, E>(executor: E, deployment_id: i64, reason: JobReason) -> Result<ReconcileJob, EngineError>
    where
        E: Executor<'e, Database = Any>,
    {
        sqlx::query_as::<_, ReconcileJob>(
            r#"INSERT INTO deployment_reconcile_job (deployment_id, reason, status, attempt)
               VALUES (?, ?, ?, 0)
               RETURNING id, deployment_id, reason, status, run_after, attempt, locked_by, locked_at, last_error, created_at, updated_at"#,
        )
        .bind(deployment_id)
        .bind(reason.to_string())
        .bind(JobStatus::Queued.to_string())
        .fetch_one(executor)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => EngineError::DeploymentInProgress,
            _ => EngineError::from(err),
        })
    }

    /// Claims the oldest runnable job for `worker_id`, or `None` if there is
    /// none. Dialect-specific to guarantee mutual exclusion under
    /// concurrent callers.
    pub async fn claim_next(pool: &AnyPool, backend: Backend, worker_id: &str) -> Result<Option<ReconcileJob>, sqlx::Error> {
        match backend {
            Backend::Postgres => Self::claim_next_postgres(pool, worker_id).await,
            Backend::Sqlite => Self::claim_next_sqlite(pool, worker_id).await,
        }
    }

    async fn claim_next_postgres(pool: &AnyPool, worker_id: &str) -> Result<Option<ReconcileJob>, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let candidate: Option<(i64,)> = sqlx::query_as(
            r#"SELECT id FROM deployment_reconcile_job
               WHERE status = ? AND run_after <= CURRENT_TIMESTAMP
               ORDER BY run_after, id
               LIMIT 1
               FOR UPDATE SKIP LOCKED"#,
        )
        .bind(JobStatus::Queued.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        let Some((job_id,)) = candidate else {
            tx.commit().await?;
            return Ok(None);
        };

        let job = sqlx::query_as::<_, ReconcileJob>(
            r#"UPDATE deployment_reconcile_job
               SET status = ?, locked_by = ?, locked_at = CURRENT_TIMESTAMP
               WHERE id = ?
               RETURNING id, deployment_id, reason, status, run_after, attempt, locked_by, locked_at, last_error, created_at, updated_at"#,
        )
        .bind(JobStatus::Running.to_string())
        .bind(worker_id)
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(job))
    }

    async fn claim_next_sqlite(pool: &AnyPool, worker_id: &str) -> Result<Option<ReconcileJob>, sqlx::Error> {
        let job = sqlx::query_as::<_, ReconcileJob>(
            r#"UPDATE deployment_reconcile_job
               SET status = ?, locked_by = ?, locked_at = CURRENT_TIMESTAMP
               WHERE id = (
                   SELECT id FROM deployment_reconcile_job
                   WHERE status = ? AND run_after <= CURRENT_TIMESTAMP
                   ORDER BY run_after, id
                   LIMIT 1
               )
               RETURNING id, deployment_id, reason, status, run_after, attempt, locked_by, locked_at, last_error, created_at, updated_at"#,
        )
        .bind(JobStatus::Running.to_string())
        .bind(worker_id)
        .bind(JobStatus::Queued.to_string())
        .fetch_optional(pool)
        .await?;
        Ok(job)
    }

    pub async fn mark_done<'e, E>(executor: E, job_id: i64) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Any>,
    {
        sqlx::query(
            r#"UPDATE deployment_reconcile_job
               SET status = ?, locked_by = NULL, locked_at = NULL, last_error = NULL, updated_at = CURRENT_TIMESTAMP
               WHERE id = ?"#,
        )
        .bind(JobStatus::Done.to_string())
        .bind(job_id)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn mark_failed<'e, E>(executor: E, job_id: i64, error: &str) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Any>,
    {
        sqlx::query(
            r#"UPDATE deployment_reconcile_job
               SET status = ?, locked_by = NULL, locked_at = NULL, last_error = ?, updated_at = CURRENT_TIMESTAMP
               WHERE id = ?"#,
        )
        .bind(JobStatus::Failed.to_string())
        .bind(error)
        .bind(job_id)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// `run_after` is computed by the caller (`now + delay_s`) rather than
    /// in SQL — date arithmetic functions differ enough between Postgres
    /// and SQLite that doing it in Rust keeps this one query portable
    /// across both, consistent with claim being the only dialect-specific
    /// operation.
    pub async fn requeue<'e, E>(executor: E, job_id: i64, error: &str, run_after: chrono::DateTime<chrono::Utc>) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Any>,
    {
        sqlx::query(
            r#"UPDATE deployment_reconcile_job
               SET status = ?, attempt = attempt + 1, run_after = ?,
                   locked_by = NULL, locked_at = NULL, last_error = ?, updated_at = CURRENT_TIMESTAMP
               WHERE id = ?"#,
        )
        .bind(JobStatus::Queued.to_string())
        .bind(run_after)
        .bind(error)
        .bind(job_id)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn list_jobs<'e, E>(executor: E, status: Option<JobStatus>, deployment_id: Option<i64>, limit: i64) -> Result<Vec<ReconcileJob>, sqlx::Error>
    where
        E: Executor<'e, Database = Any>,
    {
        let status = status.map(|s| s.to_string());
        sqlx::query_as::<_, ReconcileJob>(
            r#"SELECT id, deployment_id, reason, status, run_after, attempt, locked_by, locked_at, last_error, created_at, updated_at
               FROM deployment_reconcile_job
               WHERE (? IS NULL OR status = ?) AND (? IS NULL OR deployment_id = ?)
               ORDER BY run_after, id
               LIMIT ?"#,
        )
        .bind(status.clone())
        .bind(status)
        .bind(deployment_id)
        .bind(deployment_id)
        .bind(limit)
        .fetch_all(executor)
        .await
    }

    /// Keeps the earliest open job for `deployment_id` and deletes the rest,
    /// returning the count removed.
    pub async fn dedupe_open<'e, E>(executor: E, deployment_id: i64) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Any>,
    {
        let result = sqlx::query(
            r#"DELETE FROM deployment_reconcile_job
               WHERE deployment_id = ? AND status IN (?, ?)
               AND id NOT IN (
                   SELECT id FROM (
                       SELECT id FROM deployment_reconcile_job
                       WHERE deployment_id = ? AND status IN (?, ?)
                       ORDER BY run_after, id
                       LIMIT 1
                   ) AS keep
               )"#,
        )
        .bind(deployment_id)
        .bind(JobStatus::Queued.to_string())
        .bind(JobStatus::Running.to_string())
        .bind(deployment_id)
        .bind(JobStatus::Queued.to_string())
        .bind(JobStatus::Running.to_string())
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Requeues `running` jobs whose lease has expired: same effect as
    /// `requeue`, but with no additional backoff (the lease already
    /// elapsed) and a sweep-generated error message. Returns the count
    /// recovered. `now` and the lease cutoff are computed by the caller so
    /// the sweep can be exercised with injected timestamps in tests.
    pub async fn recover_stale(pool: &AnyPool, cutoff: chrono::DateTime<chrono::Utc>, now: chrono::DateTime<chrono::Utc>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE deployment_reconcile_job
               SET status = ?, attempt = attempt + 1, run_after = ?,
                   locked_by = NULL, locked_at = NULL,
                   last_error = 'recovered: lease expired for worker ' || COALESCE(locked_by, 'unknown'),
                   updated_at = ?
               WHERE status = ?
                 AND locked_at IS NOT NULL
                 AND locked_at <= ?"#,
        )
        .bind(JobStatus::Queued.to_string())
        .bind(now)
        .bind(now)
        .bind(JobStatus::Running.to_string())
        .bind(cutoff)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn setup() -> AnyPool {
        let database = Database::connect("sqlite::memory:").await.unwrap();
        database.migrate().await.unwrap();
        database.pool
    }

    /// Seeds a user/product/template/deployment trio so a job can reference
    /// a real `deployment_id` (the FK cascade requires one).
    async fn seed_deployment(pool: &AnyPool) -> i64 {
        let user = crate::repository::UserRepository::create(pool, "u@example.com", false).await.unwrap();
        let product = crate::repository::ProductRepository::create(pool, "hello", None).await.unwrap();
        let template = crate::repository::TemplateRepository::create(
            pool,
            product.id,
            "oci://example/chart",
            "1.0.0",
            None,
            None,
            None,
            None,
            None,
            None,
        )
        .await
        .unwrap();
        let deployment =
            crate::repository::DeploymentRepository::create(pool, user.id, "a.test", "dep-abc123", template.id, None).await.unwrap();
        deployment.id
    }

    #[tokio::test]
    async fn recover_stale_requeues_jobs_past_their_lease() {
        let pool = setup().await;
        let deployment_id = seed_deployment(&pool).await;

        let job = QueueRepository::enqueue(&pool, deployment_id, JobReason::Create).await.unwrap();
        let claimed = QueueRepository::claim_next(&pool, Backend::Sqlite, "worker-stale").await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.status, "running");

        // Simulate a worker that claimed the job long ago and crashed: push
        // locked_at into the past directly, bypassing the queue API.
        let stale_locked_at = chrono::Utc::now() - chrono::Duration::seconds(3600);
        sqlx::query("UPDATE deployment_reconcile_job SET locked_at = ? WHERE id = ?")
            .bind(stale_locked_at)
            .bind(job.id)
            .execute(&pool)
            .await
            .unwrap();

        let now = chrono::Utc::now();
        let cutoff = now - chrono::Duration::seconds(900);
        let recovered = QueueRepository::recover_stale(&pool, cutoff, now).await.unwrap();
        assert_eq!(recovered, 1);

        let jobs = QueueRepository::list_jobs(&pool, None, Some(deployment_id), 10).await.unwrap();
        let recovered_job = jobs.iter().find(|j| j.id == job.id).unwrap();
        assert_eq!(recovered_job.status, "queued");
        assert_eq!(recovered_job.attempt, 1);
        assert!(recovered_job.locked_by.is_none());
        assert!(recovered_job.locked_at.is_none());
        assert!((recovered_job.run_after - now).num_milliseconds().abs() < 1000);
        assert!(recovered_job.last_error.as_deref().unwrap_or_default().contains("lease expired"));
    }

    #[tokio::test]
    async fn recover_stale_ignores_jobs_within_their_lease() {
        let pool = setup().await;
        let deployment_id = seed_deployment(&pool).await;

        let job = QueueRepository::enqueue(&pool, deployment_id, JobReason::Create).await.unwrap();
        QueueRepository::claim_next(&pool, Backend::Sqlite, "worker-fresh").await.unwrap();

        let now = chrono::Utc::now();
        let cutoff = now - chrono::Duration::seconds(900);
        let recovered = QueueRepository::recover_stale(&pool, cutoff, now).await.unwrap();
        assert_eq!(recovered, 0);

        let jobs = QueueRepository::list_jobs(&pool, None, Some(deployment_id), 10).await.unwrap();
        let untouched = jobs.iter().find(|j| j.id == job.id).unwrap();
        assert_eq!(untouched.status, "running");
    }
}
