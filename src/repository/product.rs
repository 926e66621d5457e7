use sqlx::Executor;

use crate::models::Product;

pub struct ProductRepository;

impl ProductRepository {
    pub async fn find_active<'e, E>(executor: E, product_id: i64) -> Result<Option<Product>, sqlx::Error>
    where
        E: Executor<'e, Database = sqlx::Any>,
    {
        sqlx::query_as::<_, Product>(
            r#"SELECT id, name, description, canonical_template_id, created_at, deleted_at
               FROM product WHERE id = ? AND deleted_at IS NULL"#,
        )
        .bind(product_id)
        .fetch_optional(executor)
        .await
    }

    pub async fn create<'e, E>(executor: E, name: &str, description: Option<&str>) -> Result<Product, sqlx::Error>
    where
        E: Executor<'e, Database = sqlx::Any>,
    {
        sqlx::query_as::<_, Product>(
            r#"INSERT INTO product (name, description) VALUES (?, ?)
               RETURNING id, name, description, canonical_template_id, created_at, deleted_at"#,
        )
        .bind(name)
        .bind(description)
        .fetch_one(executor)
        .await
    }

    pub async fn set_canonical_template<'e, E>(executor: E, product_id: i64, template_id: i64) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = sqlx::Any>,
    {
        sqlx::query("UPDATE product SET canonical_template_id = ? WHERE id = ?")
            .bind(template_id)
            .bind(product_id)
            .execute(executor)
            .await?;
        Ok(())
    }
}
