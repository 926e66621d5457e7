use sqlx::Executor;

use crate::models::Template;

pub struct TemplateRepository;

impl TemplateRepository {
    pub async fn find_active<'e, E>(executor: E, template_id: i64) -> Result<Option<Template>, sqlx::Error>
    where
        E: Executor<'e, Database = sqlx::Any>,
    {
        sqlx::query_as::<_, Template>(
            r#"SELECT id, product_id, chart_ref, chart_version, chart_digest, version_label,
                      default_values_json, values_schema_json, capabilities_json,
                      health_timeout_sec, created_at, deleted_at
               FROM product_template_version WHERE id = ? AND deleted_at IS NULL"#,
        )
        .bind(template_id)
        .fetch_optional(executor)
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create<'e, E>(
        executor: E,
        product_id: i64,
        chart_ref: &str,
        chart_version: &str,
        chart_digest: Option<&str>,
        version_label: Option<&str>,
        default_values_json: Option<&serde_json::Value>,
        values_schema_json: Option<&serde_json::Value>,
        capabilities_json: Option<&serde_json::Value>,
        health_timeout_sec: Option<i32>,
    ) -> Result<Template, sqlx::Error>
    where
        E: Executor<'e, Database = sqlx::Any>,
    {
        sqlx::query_as::<_, Template>(
            r#"INSERT INTO product_template_version
                   (product_id, chart_ref, chart_version, chart_digest, version_label,
                    default_values_json, values_schema_json, capabilities_json, health_timeout_sec)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               RETURNING id, product_id, chart_ref, chart_version, chart_digest, version_label,
                         default_values_json, values_schema_json, capabilities_json,
                         health_timeout_sec, created_at, deleted_at"#,
        )
        .bind(product_id)
        .bind(chart_ref)
        .bind(chart_version)
        .bind(chart_digest)
        .bind(version_label)
        .bind(default_values_json)
        .bind(values_schema_json)
        .bind(capabilities_json)
        .bind(health_timeout_sec)
        .fetch_one(executor)
        .await
    }
}
