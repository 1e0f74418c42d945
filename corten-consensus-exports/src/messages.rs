use crate::settings::RoundStep;
use corten_models::bit_array::BitArray;
use corten_models::block_id::{BlockId, PartSetHeader};
use corten_models::part_set::Part;
use corten_models::proposal::Proposal;
use corten_models::vote::{SignedMsgType, Vote};
use corten_models::{Height, Round};
use corten_time::Timestamp;

/// A message consumed by the consensus state machine, either from a peer or
/// looped back from the node's own proposer/voter path.
#[derive(Debug, Clone)]
pub enum ConsensusMessage {
    /// A signed proposal.
    Proposal(Proposal),
    /// One part of the proposed block.
    BlockPart {
        /// Height the part belongs to.
        height: Height,
        /// Round the part belongs to.
        round: Round,
        /// The part itself.
        part: Part,
    },
    /// A prevote or precommit.
    Vote(Vote),
}

/// A mailbox entry: the message plus its origin. `None` marks internal
/// messages from this node's own signing path.
#[derive(Debug, Clone)]
pub struct MessageInfo {
    /// The message.
    pub msg: ConsensusMessage,
    /// Sending peer, `None` for internal messages.
    pub peer_id: Option<String>,
}

/// Compact view of the round state, broadcast to peers on every step change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundStateSummary {
    /// Current height.
    pub height: Height,
    /// Current round.
    pub round: Round,
    /// Current step.
    pub step: RoundStep,
    /// When the current height started.
    pub start_time: Timestamp,
    /// Round of the commit of the previous height, `-1` before the first.
    pub last_commit_round: Round,
    /// Block with +2/3 prevotes in the current round, when known.
    pub prevote_maj23: Option<BlockId>,
    /// Block with +2/3 precommits in the current round, when known.
    pub precommit_maj23: Option<BlockId>,
}

/// Outbound notifications from the state machine to the gossip layer.
#[derive(Debug, Clone)]
pub enum GossipEvent {
    /// Broadcast this node's proposal.
    Proposal(Proposal),
    /// Broadcast one part of this node's proposal.
    BlockPart {
        /// Height of the part.
        height: Height,
        /// Round of the part.
        round: Round,
        /// The part.
        part: Part,
    },
    /// Broadcast this node's signed vote.
    Vote(Vote),
    /// The round state changed.
    RoundStep(RoundStateSummary),
    /// +2/3 prevotes exist for a block; peers can fetch its parts.
    NewValidBlock {
        /// Height of the valid block.
        height: Height,
        /// Round it was seen in.
        round: Round,
        /// Part-set header of the valid block.
        parts_header: PartSetHeader,
        /// Parts this node holds.
        parts: BitArray,
        /// True once the block is committed.
        is_commit: bool,
    },
    /// A vote from some validator was accepted.
    HasVote {
        /// Height of the vote.
        height: Height,
        /// Round of the vote.
        round: Round,
        /// Prevote or precommit.
        vote_type: SignedMsgType,
        /// Validator index.
        index: i32,
    },
}

/// The bit array of votes matching a (height, round, type, block id) query,
/// used to answer vote-set-bits requests.
#[derive(Debug, Clone)]
pub struct VoteSetBits {
    /// Queried height.
    pub height: Height,
    /// Queried round.
    pub round: Round,
    /// Queried vote type.
    pub vote_type: SignedMsgType,
    /// Queried block id.
    pub block_id: BlockId,
    /// Which validators' votes this node holds for that block.
    pub votes: BitArray,
}
