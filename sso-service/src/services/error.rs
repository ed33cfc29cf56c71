use service_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    /// Storage failure raised by non-SQL backends (and test doubles).
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not a local user: {0}")]
    NotLocalUser(String),

    #[error("Provisioning hook rejected {0}: {1}")]
    Hook(String, String),

    #[error("CAS protocol error: {0}")]
    CasProtocol(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    /// Whether the error came from a storage collaborator rather than from
    /// policy (used by protocol endpoints that must answer 500).
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            ServiceError::Database(_) | ServiceError::Cache(_) | ServiceError::Storage(_)
        )
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Database(e) => AppError::DatabaseError(anyhow::anyhow!(e)),
            ServiceError::Cache(e) => AppError::RedisError(e),
            ServiceError::Storage(e) => AppError::DatabaseError(anyhow::anyhow!(e)),
            ServiceError::NotLocalUser(who) => {
                AppError::AuthError(anyhow::anyhow!("Not a local user: {who}"))
            }
            ServiceError::Hook(who, reason) => {
                AppError::InternalError(anyhow::anyhow!("Provisioning hook rejected {who}: {reason}"))
            }
            ServiceError::CasProtocol(e) => AppError::AuthError(anyhow::anyhow!(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}
