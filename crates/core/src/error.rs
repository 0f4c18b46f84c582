// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported operation: {0} (expected one of create, update, delete, bulkCreate, bulkUpdate, bulkDelete)")]
    UnsupportedOperation(String),

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Errors a caller should see synchronously at the API boundary
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppError::Validation(_)
                | AppError::UnsupportedOperation(_)
                | AppError::QueueNotFound(_)
                | AppError::WorkerNotFound(_)
                | AppError::TaskNotFound(_)
        )
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors() {
        assert!(AppError::QueueNotFound("q1".into()).is_client_error());
        assert!(AppError::Validation("empty payload".into()).is_client_error());
        assert!(!AppError::Persistence("disk full".into()).is_client_error());
        assert!(!AppError::InvalidState("shut down".into()).is_client_error());
    }

    #[test]
    fn test_serde_errors_convert() {
        let err: AppError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, AppError::Serialization(_)));
    }
}
