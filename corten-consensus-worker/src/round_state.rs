//! Mutable state of the height/round currently being decided.

use crate::height_vote_set::HeightVoteSet;
use corten_consensus_exports::{RoundStateSummary, RoundStep};
use corten_models::block::Block;
use corten_models::part_set::PartSet;
use corten_models::proposal::Proposal;
use corten_models::validator::ValidatorSet;
use corten_models::vote_set::VoteSet;
use corten_models::{Height, Round};
use corten_time::Timestamp;

/// Everything the state machine mutates while driving one height. Historical
/// rounds of the same height stay reachable through `votes`; previous
/// heights survive only as `last_commit`.
pub struct RoundState {
    /// Height being decided.
    pub height: Height,
    /// Current round.
    pub round: Round,
    /// Current step.
    pub step: RoundStep,
    /// When this height started (or will start, while in NewHeight).
    pub start_time: Timestamp,
    /// When the commit of this height was first reached.
    pub commit_time: Timestamp,
    /// Validator set of this height, proposer memoized for the current round.
    pub validators: ValidatorSet,
    /// The proposal of the current round, if received.
    pub proposal: Option<Proposal>,
    /// The proposed block, once its parts assemble.
    pub proposal_block: Option<Block>,
    /// Assembly state of the proposed block.
    pub proposal_block_parts: Option<PartSet>,
    /// Round this node is locked on, `-1` when unlocked.
    pub locked_round: Round,
    /// The locked block.
    pub locked_block: Option<Block>,
    /// Parts of the locked block.
    pub locked_block_parts: Option<PartSet>,
    /// Most recent round with +2/3 prevotes for a block, `-1` if none.
    pub valid_round: Round,
    /// The proof-of-lock block of `valid_round`.
    pub valid_block: Option<Block>,
    /// Parts of the valid block.
    pub valid_block_parts: Option<PartSet>,
    /// All vote sets of this height.
    pub votes: HeightVoteSet,
    /// Round the commit was reached in, `-1` until then.
    pub commit_round: Round,
    /// Precommit set that committed the previous height.
    pub last_commit: Option<VoteSet>,
    /// Guards the precommit-wait timeout against rescheduling.
    pub triggered_timeout_precommit: bool,
}

impl RoundState {
    /// Compact summary for gossip.
    pub fn summary(&self) -> RoundStateSummary {
        RoundStateSummary {
            height: self.height,
            round: self.round,
            step: self.step,
            start_time: self.start_time,
            last_commit_round: self
                .last_commit
                .as_ref()
                .map(|commit| commit.round())
                .unwrap_or(-1),
            prevote_maj23: self
                .votes
                .prevotes(self.round)
                .and_then(|set| set.two_thirds_majority()),
            precommit_maj23: self
                .votes
                .precommits(self.round)
                .and_then(|set| set.two_thirds_majority()),
        }
    }

    /// True once both the proposal and its full block are present, including
    /// the proof-of-lock prevotes when the proposal points at one.
    pub fn is_proposal_complete(&self) -> bool {
        let proposal = match &self.proposal {
            Some(proposal) => proposal,
            None => return false,
        };
        if self.proposal_block.is_none() {
            return false;
        }
        if proposal.pol_round < 0 {
            return true;
        }
        self.votes
            .prevotes(proposal.pol_round)
            .map(|prevotes| prevotes.two_thirds_majority().is_some())
            .unwrap_or(false)
    }
}
