use displaydoc::Display;
use thiserror::Error;

/// Execution result alias.
pub type ExecutionResult<T, E = ExecutionError> = core::result::Result<T, E>;

/// Errors of the block executor. All of them are fatal to the block being
/// applied; storage variants are fatal to the engine.
#[non_exhaustive]
#[derive(Display, Error, Debug, Clone)]
pub enum ExecutionError {
    /// invalid block: {0}
    InvalidBlock(String),
    /// models error: {0}
    Models(String),
    /// storage error: {0}
    Store(#[from] corten_storage::StoreError),
    /// application returned an unusable response: {0}
    Application(String),
    /// invalid validator update: {0}
    InvalidValidatorUpdate(String),
    /// handshake failed: {0}
    Handshake(String),
}

impl From<corten_models::ModelsError> for ExecutionError {
    fn from(err: corten_models::ModelsError) -> Self {
        ExecutionError::Models(err.to_string())
    }
}
