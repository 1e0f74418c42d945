//! The event bus: committed-block and consensus-progress notifications
//! fanned out to local subscribers over a broadcast channel.

use corten_models::abci::ResponseDeliverTx;
use corten_models::block::{Block, BlockHeader, Tx};
use corten_models::block_id::BlockId;
use corten_models::evidence::Evidence;
use corten_models::validator::Validator;
use corten_models::vote::Vote;
use corten_models::{Height, Round};
use tokio::sync::broadcast;
use tracing::trace;

/// Default broadcast capacity per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Events published by the consensus state machine and the block executor.
#[derive(Debug, Clone)]
pub enum ConsensusEvent {
    /// A new round started.
    NewRound {
        /// Height of the round.
        height: Height,
        /// Round number.
        round: Round,
    },
    /// A complete proposal was accepted for the current round.
    NewProposal {
        /// Height of the proposal.
        height: Height,
        /// Round of the proposal.
        round: Round,
    },
    /// This node signed and published a vote.
    Vote {
        /// The signed vote.
        vote: Vote,
    },
    /// A block was committed and applied.
    NewBlock {
        /// The committed block.
        block: Box<Block>,
        /// Its id.
        block_id: BlockId,
    },
    /// Header-only view of a committed block.
    NewBlockHeader {
        /// The committed header.
        header: BlockHeader,
        /// Number of transactions in the block.
        num_txs: i64,
    },
    /// One transaction was executed in a committed block.
    Tx {
        /// Height of the block.
        height: Height,
        /// Position within the block.
        index: u32,
        /// The transaction.
        tx: Tx,
        /// Its execution result.
        result: ResponseDeliverTx,
    },
    /// Evidence was committed in a block.
    NewEvidence {
        /// The committed evidence.
        evidence: Box<Evidence>,
        /// Height of the including block.
        height: Height,
    },
    /// The application changed the validator set.
    ValidatorSetUpdates {
        /// The applied updates.
        updates: Vec<Validator>,
    },
}

/// Receiving side of the event bus.
pub type EventReceiver = broadcast::Receiver<ConsensusEvent>;

/// Broadcast fan-out of [`ConsensusEvent`]s. Slow subscribers lag and lose
/// the oldest events, they never block the publisher.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ConsensusEvent>,
}

impl EventBus {
    /// Create a bus with the given per-subscriber capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        EventBus { sender }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Publish an event. Events without subscribers are dropped silently.
    pub fn publish(&self, event: ConsensusEvent) {
        trace!(?event, "publishing consensus event");
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
