use corten_signature::{PublicKey, PUBLIC_KEY_SIZE_BYTES};
use std::str::FromStr;

/// A peer's long-term identity: its Ed25519 public key, displayed
/// bs58-check.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(PublicKey);

impl PeerId {
    /// Wrap a public key.
    pub fn new(public_key: PublicKey) -> Self {
        PeerId(public_key)
    }

    /// The wrapped key.
    pub fn public_key(&self) -> &PublicKey {
        &self.0
    }

    /// Raw key bytes.
    pub fn to_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE_BYTES] {
        self.0.to_bytes()
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PeerId {
    type Err = corten_signature::CortenSignatureError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(PeerId(PublicKey::from_bs58_check(s)?))
    }
}

/// Transient identifier of one connection attempt, unique per process.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why a connection ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionClosureReason {
    /// Orderly shutdown.
    Normal,
    /// The peer broke the protocol.
    Failed,
    /// The peer was banned.
    Banned,
    /// No message within the heartbeat window.
    HeartbeatTimeout,
}
