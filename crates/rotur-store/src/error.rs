use rotur_shared::ValidationError;
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Requested entity is absent.
    #[error("{0} not found")]
    NotFound(String),

    /// Uniqueness violation (username, email, item name, key name, group tag).
    #[error("{0} already exists")]
    Conflict(String),

    /// The entity's state refuses the requested transition.
    #[error("{0}")]
    PreconditionFailed(String),

    /// An OFSF batch left the user above their quota. Earlier commands of
    /// the batch are not rolled back.
    #[error("Max Upload Size Exceeded")]
    QuotaExceeded { used: u64, available: i64 },

    /// Length, charset or format violation.
    #[error("{0}")]
    BadInput(String),

    /// The caller may not touch this entity.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Filesystem error while loading or persisting.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// (De)serialization error while loading or persisting.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ValidationError> for StoreError {
    fn from(e: ValidationError) -> Self {
        StoreError::BadInput(e.to_string())
    }
}

impl StoreError {
    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        StoreError::NotFound(what.into())
    }

    pub(crate) fn precondition(msg: impl Into<String>) -> Self {
        StoreError::PreconditionFailed(msg.into())
    }

    pub(crate) fn forbidden(msg: impl Into<String>) -> Self {
        StoreError::Forbidden(msg.into())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
