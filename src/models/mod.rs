//! Entities from the data model: `Product`, `Template`, `Deployment`,
//! `User`, and `ReconcileJob`, plus their status/reason enums.
//!
//! Kept as plain structs deriving `sqlx::FromRow`, matching the
//! repository-layer idiom of the reference deployment-automation pack this
//! crate's repository module is grounded on (row structs mapped straight
//! off `SELECT *`, no active-record behavior).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Provisioning,
    Ready,
    Upgrading,
    Deleting,
    Deleted,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum JobReason {
    Create,
    Update,
    Delete,
    Drift,
    Retry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub canonical_template_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Template {
    pub id: i64,
    pub product_id: i64,
    pub chart_ref: String,
    pub chart_version: String,
    pub chart_digest: Option<String>,
    pub version_label: Option<String>,
    pub default_values_json: Option<Value>,
    pub values_schema_json: Option<Value>,
    pub capabilities_json: Option<Value>,
    pub health_timeout_sec: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Template {
    pub fn health_timeout_sec_or_default(&self) -> u32 {
        self.health_timeout_sec.map(|t| t.max(0) as u32).unwrap_or(300)
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Deployment {
    pub id: i64,
    pub user_id: i64,
    pub domainname: String,
    pub deployment_uid: String,
    pub desired_template_id: i64,
    pub applied_template_id: Option<i64>,
    pub user_values_json: Option<Value>,
    pub status: String,
    pub generation: i64,
    pub last_error: Option<String>,
    pub last_reconcile_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Deployment {
    pub fn status_enum(&self) -> Option<DeploymentStatus> {
        use std::str::FromStr;
        DeploymentStatus::from_str(&self.status).ok()
    }
}

/// A deployment with its eager-loaded relationships, matching the
/// `get`/`list` contract in §4.8: user, desired template (with product),
/// and applied template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentWithRelations {
    pub deployment: Deployment,
    pub user: User,
    pub desired_template: Template,
    pub desired_template_product: Product,
    pub applied_template: Option<Template>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ReconcileJob {
    pub id: i64,
    pub deployment_id: i64,
    pub reason: String,
    pub status: String,
    pub run_after: DateTime<Utc>,
    pub attempt: i32,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
