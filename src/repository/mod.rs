//! Repository layer: one unit struct per entity with `async fn` associated
//! functions, grounded on the reference deployment-automation pack's
//! `ProjectRepository` shape — plain `sqlx::query_as` calls against a
//! generic executor rather than an ORM.
//!
//! Every function is generic over `sqlx::Executor<Database = sqlx::Any>` so
//! the same code runs against a bare pool or inside an open transaction;
//! the service layer is what decides which one it gets.

mod deployment;
mod product;
mod template;
mod user;

pub use deployment::DeploymentRepository;
pub use product::ProductRepository;
pub use template::TemplateRepository;
pub use user::UserRepository;
