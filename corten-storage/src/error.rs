use displaydoc::Display;
use thiserror::Error;

/// Storage result alias.
pub type StoreResult<T, E = StoreError> = core::result::Result<T, E>;

/// Errors of the block and state stores. Considered fatal by callers.
#[non_exhaustive]
#[derive(Display, Error, Debug, Clone)]
pub enum StoreError {
    /// database error: {0}
    Db(#[from] corten_db::DbError),
    /// models error: {0}
    Models(String),
    /// corrupted stored value under key {0}
    Corruption(String),
    /// store inconsistency: {0}
    Inconsistency(String),
}

impl From<corten_models::ModelsError> for StoreError {
    fn from(err: corten_models::ModelsError) -> Self {
        StoreError::Models(err.to_string())
    }
}

impl From<corten_serialization::SerializeError> for StoreError {
    fn from(err: corten_serialization::SerializeError) -> Self {
        StoreError::Models(err.to_string())
    }
}
