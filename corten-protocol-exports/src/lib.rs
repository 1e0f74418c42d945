//! Interfaces of the gossip layer: the per-channel wire messages exchanged
//! between reactors, their codecs, configuration, events, and errors.

#![warn(unused_crate_dependencies)]

mod config;
mod error;
mod events;
mod messages;

pub use config::ProtocolConfig;
pub use error::{ProtocolError, ProtocolResult};
pub use events::ProtocolEvent;
pub use messages::{
    BlockSyncMessage, BlockSyncMessageDeserializer, BlockSyncMessageSerializer, DataMessage,
    DataMessageDeserializer, DataMessageSerializer, EvidenceMessage,
    EvidenceMessageDeserializer, EvidenceMessageSerializer, MempoolMessage,
    MempoolMessageDeserializer, MempoolMessageSerializer, StateMessage,
    StateMessageDeserializer, StateMessageSerializer, VoteChannelMessage,
    VoteChannelMessageDeserializer, VoteChannelMessageSerializer, VoteSetBitsMessage,
    VoteSetBitsMessageDeserializer, VoteSetBitsMessageSerializer,
};
