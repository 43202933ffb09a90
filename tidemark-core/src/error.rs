// tidemark-core/src/error.rs

use crate::domain::error::DomainError;
use crate::infrastructure::error::InfrastructureError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TidemarkError {
    // --- ERREURS DU DOMAINE (Patterns, Cost guard, Config rules) ---
    #[error(transparent)]
    Domain(#[from] DomainError),

    // --- ERREURS D'INFRASTRUCTURE (IO, Drivers, HTTP, Templates) ---
    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),

    #[error("Internal Error: {0}")]
    InternalError(String),

    #[error("Unsafe path traversal detected: {0}")]
    UnsafePath(String),
}

impl TidemarkError {
    /// True when the error is the BigQuery cost guard rejecting a query.
    pub fn is_cost_rejection(&self) -> bool {
        matches!(
            self,
            TidemarkError::Domain(DomainError::CostLimitExceeded { .. })
        )
    }
}

// Manual implementations to keep `?` ergonomic without duplicate variants
impl From<std::io::Error> for TidemarkError {
    fn from(err: std::io::Error) -> Self {
        TidemarkError::Infrastructure(InfrastructureError::Io(err))
    }
}

impl From<duckdb::Error> for TidemarkError {
    fn from(err: duckdb::Error) -> Self {
        TidemarkError::Infrastructure(InfrastructureError::from(err))
    }
}

impl From<sqlx::Error> for TidemarkError {
    fn from(err: sqlx::Error) -> Self {
        TidemarkError::Infrastructure(InfrastructureError::from(err))
    }
}

impl From<reqwest::Error> for TidemarkError {
    fn from(err: reqwest::Error) -> Self {
        TidemarkError::Infrastructure(InfrastructureError::Http(err))
    }
}

impl From<minijinja::Error> for TidemarkError {
    fn from(err: minijinja::Error) -> Self {
        TidemarkError::Infrastructure(InfrastructureError::TemplateError(err))
    }
}

impl From<serde_json::Error> for TidemarkError {
    fn from(err: serde_json::Error) -> Self {
        TidemarkError::Infrastructure(InfrastructureError::Json(err))
    }
}
