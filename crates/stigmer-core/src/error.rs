// Error taxonomy surfaced to RPC callers.

use thiserror::Error;

use crate::kind::ResourceKind;

/// Result type alias for daemon operations
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors that cross the RPC boundary. Every variant maps onto a gRPC
/// status code; internal causes are logged, not leaked.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Schema or business-rule validation failure
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Resource missing for Get/Update/Delete or a parent lookup
    #[error("{kind} not found: {id}")]
    NotFound { kind: ResourceKind, id: String },

    /// Duplicate slug within (kind, owner_scope, org)
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Validator rejected the resource (first validator error carried)
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// Store I/O, validator failure, engine call failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        ApiError::InvalidArgument(msg.into())
    }

    pub fn not_found(kind: ResourceKind, id: impl Into<String>) -> Self {
        ApiError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        ApiError::AlreadyExists(msg.into())
    }

    pub fn failed_precondition(msg: impl Into<String>) -> Self {
        ApiError::FailedPrecondition(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError::Internal(msg.into())
    }
}

impl From<ApiError> for tonic::Status {
    fn from(err: ApiError) -> Self {
        let message = err.to_string();
        match err {
            ApiError::InvalidArgument(_) => tonic::Status::invalid_argument(message),
            ApiError::NotFound { .. } => tonic::Status::not_found(message),
            ApiError::AlreadyExists(_) => tonic::Status::already_exists(message),
            ApiError::FailedPrecondition(_) => tonic::Status::failed_precondition(message),
            ApiError::Internal(_) => {
                tracing::error!(error = %message, "internal error surfaced to caller");
                tonic::Status::internal(message)
            }
        }
    }
}
