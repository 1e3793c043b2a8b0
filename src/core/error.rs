//! # Error Types
//!
//! Typed errors for the places where callers need to branch on the failure kind.
//! Everything else propagates `anyhow::Error`.
//!
//! - **Version**: 1.0.0
//! - **Since**: 1.0.0

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the reminder service to the creation/cancellation API
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("reminder {0} not found")]
    NotFound(Uuid),

    #[error("reminder {0} belongs to another owner")]
    Forbidden(Uuid),

    #[error("invalid reminder: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Result alias for service operations
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
