//! Crate-wide error taxonomy. Variant names are the taxonomy entries
//! themselves, not incidental to a particular subsystem, so that Engine,
//! Store, Strategy and Replicator errors all fold into one type at the
//! Session/HTTP boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("strategy error: {0}")]
    Strategy(String),

    #[error("replicator unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::InvalidArgument(_) => "invalid_argument",
            SyncError::NotFound => "not_found",
            SyncError::Unauthorized => "unauthorized",
            SyncError::PermissionDenied(_) => "permission_denied",
            SyncError::Storage(_) => "storage_error",
            SyncError::Strategy(_) => "strategy_error",
            SyncError::Unavailable(_) => "unavailable",
            SyncError::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
