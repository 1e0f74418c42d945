use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Gossip channel identifiers, one byte on the wire.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive,
    serde::Serialize, serde::Deserialize,
)]
#[repr(u8)]
pub enum ChannelId {
    /// Fatal peer errors before disconnect.
    PeerError = 0x00,
    /// Consensus round-step and majority claims.
    State = 0x20,
    /// Proposals and block parts.
    Data = 0x21,
    /// Prevotes and precommits.
    Vote = 0x22,
    /// Vote bit-array catchup.
    VoteSetBits = 0x23,
    /// Block-sync requests and responses.
    BlockSync = 0x30,
    /// Evidence gossip.
    Evidence = 0x38,
    /// Transaction gossip.
    Mempool = 0x60,
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:#04x}", u8::from(*self))
    }
}
