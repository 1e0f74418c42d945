use displaydoc::Display;
use thiserror::Error;

/// Protocol result alias.
pub type ProtocolResult<T, E = ProtocolError> = core::result::Result<T, E>;

#[non_exhaustive]
#[derive(Display, Error, Debug)]
pub enum ProtocolError {
    /// malformed message from peer: {0}
    BadMessage(String),
    /// models error: {0}
    Models(String),
    /// storage error: {0}
    Store(#[from] corten_storage::StoreError),
    /// channel error: {0}
    Channel(String),
    /// unknown syncing peer {0}
    UnknownPeer(String),
}

impl From<corten_models::ModelsError> for ProtocolError {
    fn from(err: corten_models::ModelsError) -> Self {
        ProtocolError::Models(err.to_string())
    }
}

impl From<corten_serialization::SerializeError> for ProtocolError {
    fn from(err: corten_serialization::SerializeError) -> Self {
        ProtocolError::Models(err.to_string())
    }
}
