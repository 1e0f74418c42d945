use displaydoc::Display;
use thiserror::Error;

/// Network result alias.
pub type NetworkResult<T, E = NetworkError> = core::result::Result<T, E>;

#[non_exhaustive]
#[derive(Display, Error, Debug)]
pub enum NetworkError {
    /// io error: {0}
    Io(#[from] std::io::Error),
    /// handshake failed: {0}
    Handshake(String),
    /// crypto failure: {0}
    Crypto(String),
    /// record of {0} bytes is not a sealed frame
    BadFrame(usize),
    /// frame failed authentication (wrong key or sequence)
    BadSeal,
    /// malformed packet: {0}
    BadPacket(String),
    /// message of {0} bytes exceeds the limit of {1}
    MessageTooBig(usize, u32),
    /// operation timed out: {0}
    Timeout(String),
    /// connection limit reached
    TooManyConnections,
    /// peer {0} is banned
    Banned(String),
    /// peer misbehaved: {0}
    ProtocolViolation(String),
    /// channel error: {0}
    Channel(String),
    /// connection closed
    ConnectionClosed,
}
