use displaydoc::Display;
use thiserror::Error;

/// Models result alias.
pub type ModelsResult<T, E = ModelsError> = core::result::Result<T, E>;

#[non_exhaustive]
#[derive(Display, Error, Debug, Clone)]
pub enum ModelsError {
    /// serialization error: {0}
    SerializeError(#[from] corten_serialization::SerializeError),
    /// deserialization error: {0}
    DeserializeError(String),
    /// hash error: {0}
    HashError(#[from] corten_hash::CortenHashError),
    /// signature error: {0}
    SignatureError(#[from] corten_signature::CortenSignatureError),
    /// time error: {0}
    TimeError(#[from] corten_time::TimeError),
    /// invalid block: {0}
    InvalidBlock(String),
    /// invalid part: {0}
    InvalidPart(String),
    /// invalid vote: {0}
    InvalidVote(String),
    /// invalid evidence: {0}
    InvalidEvidence(String),
    /// invalid validator set: {0}
    InvalidValidatorSet(String),
    /// invalid genesis: {0}
    InvalidGenesis(String),
    /// invalid consensus params: {0}
    InvalidConsensusParams(String),
    /// container inconsistency: {0}
    ContainerInconsistency(String),
}
