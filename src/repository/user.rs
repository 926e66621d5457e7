use sqlx::Executor;

use crate::models::User;

pub struct UserRepository;

impl UserRepository {
    pub async fn find_active<'e, E>(executor: E, user_id: i64) -> Result<Option<User>, sqlx::Error>
    where
        E: Executor<'e, Database = sqlx::Any>,
    {
        sqlx::query_as::<_, User>(
            r#"SELECT id, email, is_admin, created_at, deleted_at FROM "user" WHERE id = ? AND deleted_at IS NULL"#,
        )
        .bind(user_id)
        .fetch_optional(executor)
        .await
    }

    pub async fn create<'e, E>(executor: E, email: &str, is_admin: bool) -> Result<User, sqlx::Error>
    where
        E: Executor<'e, Database = sqlx::Any>,
    {
        sqlx::query_as::<_, User>(
            r#"INSERT INTO "user" (email, is_admin) VALUES (?, ?)
               RETURNING id, email, is_admin, created_at, deleted_at"#,
        )
        .bind(email)
        .bind(is_admin)
        .fetch_one(executor)
        .await
    }
}
