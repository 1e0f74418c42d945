use crate::messages::{RoundStateSummary, VoteSetBits};
use corten_models::bit_array::BitArray;
use corten_models::block_id::BlockId;
use corten_models::state::State;
use corten_models::vote::SignedMsgType;
use corten_models::{Height, Round};
use tokio::sync::oneshot;

/// Commands served by the consensus worker, mostly on behalf of the gossip
/// layer and the (out-of-scope) API surface.
#[derive(Debug)]
pub enum ConsensusCommand {
    /// Fetch the current round state summary.
    GetRoundState {
        /// Response channel.
        response_tx: oneshot::Sender<RoundStateSummary>,
    },
    /// Fetch the committed state snapshot.
    GetState {
        /// Response channel.
        response_tx: oneshot::Sender<State>,
    },
    /// Which votes of a (height, round, type, block id) does this node hold,
    /// for vote-set-bits catchup.
    GetVoteSetBits {
        /// Queried height.
        height: Height,
        /// Queried round.
        round: Round,
        /// Queried vote type.
        vote_type: SignedMsgType,
        /// Queried block id.
        block_id: BlockId,
        /// Response channel.
        response_tx: oneshot::Sender<Option<VoteSetBits>>,
    },
    /// Record a peer's claim of +2/3 for a block id.
    SetPeerMaj23 {
        /// Claiming peer.
        peer_id: String,
        /// Claimed height.
        height: Height,
        /// Claimed round.
        round: Round,
        /// Claimed vote type.
        vote_type: SignedMsgType,
        /// Claimed block id.
        block_id: BlockId,
    },
    /// The bit array of prevotes this node holds for a proposal POL round.
    GetProposalPol {
        /// Queried height.
        height: Height,
        /// Queried proposal POL round.
        round: Round,
        /// Response channel.
        response_tx: oneshot::Sender<Option<BitArray>>,
    },
}
