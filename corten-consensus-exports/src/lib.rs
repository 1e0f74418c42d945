//! Interfaces of the consensus state machine: configuration, round steps,
//! mailbox messages, gossip notifications, commands, and errors.

#![warn(unused_crate_dependencies)]

mod commands;
mod error;
mod messages;
mod settings;

pub use commands::ConsensusCommand;
pub use error::{ConsensusError, ConsensusResult};
pub use messages::{ConsensusMessage, GossipEvent, MessageInfo, RoundStateSummary, VoteSetBits};
pub use settings::{ConsensusConfig, RoundStep};

use tokio::sync::mpsc;

/// Channel bundle handed to the gossip layer.
pub struct ConsensusChannels {
    /// Peer and internal messages into the state machine.
    pub message_tx: mpsc::Sender<MessageInfo>,
    /// Commands into the state machine.
    pub command_tx: mpsc::Sender<ConsensusCommand>,
    /// Outbound gossip notifications.
    pub gossip_rx: mpsc::Receiver<GossipEvent>,
}
