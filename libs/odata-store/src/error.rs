use thiserror::Error;

/// Storage-layer failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    /// Duplicate key or violated relationship.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A predicate, row or key the store cannot interpret.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unsupported by this store: {0}")]
    Unsupported(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    #[must_use]
    pub fn invalid(msg: impl Into<String>) -> Self {
        StoreError::InvalidInput(msg.into())
    }

    #[must_use]
    pub fn backend(msg: impl Into<String>) -> Self {
        StoreError::Backend(msg.into())
    }
}

impl From<StoreError> for odata_model::Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => odata_model::Error::NotFound(what),
            StoreError::Conflict(msg) | StoreError::InvalidInput(msg) => {
                odata_model::Error::Validation(msg)
            }
            StoreError::Unsupported(what) => odata_model::Error::NotImplemented(what),
            e @ (StoreError::Cancelled | StoreError::Backend(_)) => {
                odata_model::Error::Internal(e.to_string())
            }
        }
    }
}

#[cfg(feature = "sea-orm")]
impl From<sea_orm::DbErr> for StoreError {
    fn from(e: sea_orm::DbErr) -> Self {
        match e.sql_err() {
            Some(sea_orm::SqlErr::UniqueConstraintViolation(msg)) => StoreError::Conflict(msg),
            Some(sea_orm::SqlErr::ForeignKeyConstraintViolation(msg)) => StoreError::Conflict(msg),
            _ => StoreError::Backend(e.to_string()),
        }
    }
}
