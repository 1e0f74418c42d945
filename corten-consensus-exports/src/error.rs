use displaydoc::Display;
use thiserror::Error;

/// Consensus result alias.
pub type ConsensusResult<T, E = ConsensusError> = core::result::Result<T, E>;

#[non_exhaustive]
#[derive(Display, Error, Debug)]
pub enum ConsensusError {
    /// models error: {0}
    Models(String),
    /// execution error: {0}
    Execution(#[from] corten_execution_exports::ExecutionError),
    /// storage error: {0}
    Store(#[from] corten_storage::StoreError),
    /// pool error: {0}
    Pool(String),
    /// time error: {0}
    Time(#[from] corten_time::TimeError),
    /// write-ahead log error: {0}
    Wal(String),
    /// invalid proposal: {0}
    InvalidProposal(String),
    /// invalid vote: {0}
    InvalidVote(String),
    /// stale message for height {0}, round {1}
    StaleMessage(i64, i32),
    /// no private validator key, cannot sign
    NoPrivValidator,
    /// channel error: {0}
    Channel(String),
    /// invariant violation: {0}
    InvariantViolation(String),
    /// io error: {0}
    Io(#[from] std::io::Error),
}

impl From<corten_models::ModelsError> for ConsensusError {
    fn from(err: corten_models::ModelsError) -> Self {
        ConsensusError::Models(err.to_string())
    }
}

impl From<corten_pool_exports::PoolError> for ConsensusError {
    fn from(err: corten_pool_exports::PoolError) -> Self {
        ConsensusError::Pool(err.to_string())
    }
}

impl From<corten_models::vote_set::VoteSetError> for ConsensusError {
    fn from(err: corten_models::vote_set::VoteSetError) -> Self {
        ConsensusError::InvalidVote(err.to_string())
    }
}
