//! Crate-wide error taxonomy.
//!
//! Write services and the values engine return [`EngineError`] directly;
//! the reconciler is the sole catch-all (§7 of the design) that also wraps
//! adapter errors into it via `#[from]`.

use crate::cmd::command::ErrorCategory;
use crate::cmd::helm::HelmError;
use crate::cmd::kubectl::KubeError;
use crate::values::ValuesError;

#[derive(thiserror::Error, Debug, Clone)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("a reconcile job is already in progress for this deployment")]
    DeploymentInProgress,

    #[error("external command failed ({category:?}): {message}")]
    CommandFailure { category: ErrorCategory, message: String },

    #[error("database error: {0}")]
    Database(String),
}

impl EngineError {
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            EngineError::CommandFailure { category, .. } => Some(*category),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.category(), Some(ErrorCategory::Retryable))
    }
}

impl From<ValuesError> for EngineError {
    fn from(err: ValuesError) -> Self {
        EngineError::Integrity(err.to_string())
    }
}

impl From<KubeError> for EngineError {
    fn from(err: KubeError) -> Self {
        EngineError::CommandFailure {
            category: err.category(),
            message: err.to_string(),
        }
    }
}

impl From<HelmError> for EngineError {
    fn from(err: HelmError) -> Self {
        EngineError::CommandFailure {
            category: err.category(),
            message: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => EngineError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                EngineError::Integrity(format!("unique constraint violated: {db_err}"))
            }
            _ => EngineError::Database(err.to_string()),
        }
    }
}
