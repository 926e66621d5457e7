//! Database bootstrap: backend detection, pool construction, and migration
//! selection.
//!
//! The repository and queue layers are written once against `sqlx::Any` so
//! the same SQL surface runs on either backend; the one thing that does
//! differ between the two is the locking strategy used to claim a queued
//! job (`SELECT ... FOR UPDATE SKIP LOCKED` exists on Postgres, not on
//! SQLite), so the detected [`Backend`] is threaded through to the queue
//! module rather than re-sniffed on every call.

use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::AnyPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Sqlite,
}

impl Backend {
    pub fn from_url(url: &str) -> Result<Backend, String> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Backend::Postgres)
        } else if url.starts_with("sqlite:") {
            Ok(Backend::Sqlite)
        } else {
            Err(format!("unrecognized database url scheme: {url}"))
        }
    }

    fn migrations_dir(self) -> &'static str {
        match self {
            Backend::Postgres => "migrations/postgres",
            Backend::Sqlite => "migrations/sqlite",
        }
    }
}

pub struct Database {
    pub backend: Backend,
    pub pool: AnyPool,
}

impl Database {
    pub async fn connect(database_url: &str) -> Result<Database, sqlx::Error> {
        install_default_drivers();
        let backend = Backend::from_url(database_url)
            .map_err(|msg| sqlx::Error::Configuration(msg.into()))?;
        // A bare `sqlite::memory:` gives each pooled connection its own,
        // separate in-memory database; a single connection keeps the whole
        // pool talking to the same one. Harmless to also apply to a
        // file-backed SQLite database, just more serial than necessary.
        let max_connections = match backend {
            Backend::Postgres => 10,
            Backend::Sqlite => 1,
        };
        let pool = AnyPoolOptions::new().max_connections(max_connections).connect(database_url).await?;
        Ok(Database { backend, pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(self.backend.migrations_dir())).await?;
        migrator.run(&self.pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_postgres_scheme() {
        assert_eq!(Backend::from_url("postgres://localhost/db").unwrap(), Backend::Postgres);
        assert_eq!(Backend::from_url("postgresql://localhost/db").unwrap(), Backend::Postgres);
    }

    #[test]
    fn detects_sqlite_scheme() {
        assert_eq!(Backend::from_url("sqlite::memory:").unwrap(), Backend::Sqlite);
        assert_eq!(Backend::from_url("sqlite:///tmp/foo.db").unwrap(), Backend::Sqlite);
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(Backend::from_url("mysql://localhost/db").is_err());
    }
}
