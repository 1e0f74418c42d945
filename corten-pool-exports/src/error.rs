use displaydoc::Display;
use thiserror::Error;

/// Pool result alias.
pub type PoolResult<T, E = PoolError> = core::result::Result<T, E>;

#[non_exhaustive]
#[derive(Display, Error, Debug, Clone)]
pub enum PoolError {
    /// transaction of {0} bytes exceeds the maximum of {1}
    TxTooBig(usize, usize),
    /// transaction failed precheck
    PrecheckFailed,
    /// transaction already in the pool
    TxAlreadyKnown,
    /// application rejected the transaction with code {0}: {1}
    TxRejected(u32, String),
    /// gas price too low to replace the existing (sender, nonce) entry
    NonceOverrideRejected,
    /// transaction pool is full
    PoolFull,
    /// invalid evidence: {0}
    InvalidEvidence(String),
    /// evidence from height {0} is expired
    ExpiredEvidence(i64),
    /// evidence was already committed
    CommittedEvidence,
    /// duplicate evidence in the checked list
    DuplicateEvidence,
    /// storage error: {0}
    Store(#[from] corten_storage::StoreError),
    /// db error: {0}
    Db(#[from] corten_db::DbError),
    /// models error: {0}
    Models(String),
    /// channel error: {0}
    Channel(String),
}

impl From<corten_models::ModelsError> for PoolError {
    fn from(err: corten_models::ModelsError) -> Self {
        PoolError::Models(err.to_string())
    }
}
