//! What one peer is known to have: its round position, the parts of the
//! current proposal it holds, and the votes it has seen.

use corten_consensus_exports::RoundStep;
use corten_models::bit_array::BitArray;
use corten_models::block_id::PartSetHeader;
use corten_models::vote::SignedMsgType;
use corten_models::{Height, Round};
use std::collections::HashMap;

/// Known consensus position of one peer, maintained from its state-channel
/// traffic. Everything resets when the peer moves to a new height or round.
#[derive(Debug, Clone)]
pub struct PeerRoundState {
    /// Peer's height.
    pub height: Height,
    /// Peer's round.
    pub round: Round,
    /// Peer's step.
    pub step: RoundStep,
    /// True once the peer has the current proposal.
    pub has_proposal: bool,
    /// Part-set header of the proposal the peer is assembling.
    pub proposal_parts_header: Option<PartSetHeader>,
    /// Parts of that proposal the peer holds.
    pub proposal_parts: Option<BitArray>,
    /// Votes the peer is known to hold, per (round, type).
    votes_seen: HashMap<(Round, u8), BitArray>,
    /// Round of the peer's last commit.
    pub last_commit_round: Round,
}

impl Default for PeerRoundState {
    fn default() -> Self {
        PeerRoundState {
            height: 0,
            round: -1,
            step: RoundStep::NewHeight,
            has_proposal: false,
            proposal_parts_header: None,
            proposal_parts: None,
            votes_seen: HashMap::new(),
            last_commit_round: -1,
        }
    }
}

impl PeerRoundState {
    /// Apply a round-step announcement.
    pub fn apply_round_step(
        &mut self,
        height: Height,
        round: Round,
        step: RoundStep,
        last_commit_round: Round,
    ) {
        let height_changed = self.height != height;
        let round_changed = height_changed || self.round != round;
        self.height = height;
        self.round = round;
        self.step = step;
        self.last_commit_round = last_commit_round;
        if round_changed {
            self.has_proposal = false;
            self.proposal_parts_header = None;
            self.proposal_parts = None;
        }
        if height_changed {
            self.votes_seen.clear();
        }
    }

    /// Apply a valid-block announcement.
    pub fn apply_new_valid_block(
        &mut self,
        height: Height,
        round: Round,
        parts_header: PartSetHeader,
        parts: BitArray,
    ) {
        if self.height != height || (self.round != round && self.step != RoundStep::Commit) {
            return;
        }
        self.proposal_parts_header = Some(parts_header);
        self.proposal_parts = Some(parts);
    }

    /// Record that the peer has the current proposal.
    pub fn set_has_proposal(&mut self, height: Height, round: Round, header: PartSetHeader) {
        if self.height != height || self.round != round || self.has_proposal {
            return;
        }
        self.has_proposal = true;
        if self.proposal_parts.is_none() {
            self.proposal_parts = Some(BitArray::new(header.total as usize));
            self.proposal_parts_header = Some(header);
        }
    }

    /// Record that the peer holds one part.
    pub fn set_has_part(&mut self, height: Height, round: Round, index: usize) {
        if self.height != height || self.round != round {
            return;
        }
        if let Some(parts) = self.proposal_parts.as_mut() {
            parts.set_index(index, true);
        }
    }

    /// True when the peer is known to hold the given part.
    pub fn has_part(&self, index: usize) -> bool {
        self.proposal_parts
            .as_ref()
            .map(|parts| parts.get_index(index))
            .unwrap_or(false)
    }

    /// Record that the peer holds the vote of `index` at (round, type).
    pub fn set_has_vote(
        &mut self,
        height: Height,
        round: Round,
        vote_type: SignedMsgType,
        index: i32,
        num_validators: usize,
    ) {
        if self.height != height || index < 0 {
            return;
        }
        let bits = self
            .votes_seen
            .entry((round, u8::from(vote_type)))
            .or_insert_with(|| BitArray::new(num_validators));
        bits.set_index(index as usize, true);
    }

    /// Merge a whole bit array of votes the peer holds.
    pub fn apply_vote_set_bits(
        &mut self,
        height: Height,
        round: Round,
        vote_type: SignedMsgType,
        votes: &BitArray,
    ) {
        if self.height != height {
            return;
        }
        let bits = self
            .votes_seen
            .entry((round, u8::from(vote_type)))
            .or_insert_with(|| BitArray::new(votes.size()));
        bits.update(votes);
    }

    /// True when the peer is known to hold the vote of `index`.
    pub fn has_vote(&self, round: Round, vote_type: SignedMsgType, index: i32) -> bool {
        if index < 0 {
            return false;
        }
        self.votes_seen
            .get(&(round, u8::from(vote_type)))
            .map(|bits| bits.get_index(index as usize))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corten_hash::Hash;

    fn header() -> PartSetHeader {
        PartSetHeader {
            total: 4,
            hash: Hash::compute_from(b"peer-state"),
        }
    }

    #[test]
    fn round_changes_reset_proposal_tracking() {
        let mut peer = PeerRoundState::default();
        peer.apply_round_step(5, 0, RoundStep::Propose, -1);
        peer.set_has_proposal(5, 0, header());
        peer.set_has_part(5, 0, 2);
        assert!(peer.has_proposal);
        assert!(peer.has_part(2));

        peer.apply_round_step(5, 1, RoundStep::Propose, -1);
        assert!(!peer.has_proposal);
        assert!(!peer.has_part(2));
    }

    #[test]
    fn votes_reset_on_height_change_only() {
        let mut peer = PeerRoundState::default();
        peer.apply_round_step(5, 0, RoundStep::Prevote, -1);
        peer.set_has_vote(5, 0, SignedMsgType::Prevote, 1, 4);
        assert!(peer.has_vote(0, SignedMsgType::Prevote, 1));

        peer.apply_round_step(5, 1, RoundStep::Propose, -1);
        assert!(peer.has_vote(0, SignedMsgType::Prevote, 1));

        peer.apply_round_step(6, 0, RoundStep::NewHeight, 0);
        assert!(!peer.has_vote(0, SignedMsgType::Prevote, 1));
    }

    #[test]
    fn vote_set_bits_merge() {
        let mut peer = PeerRoundState::default();
        peer.apply_round_step(5, 0, RoundStep::Prevote, -1);
        let mut bits = BitArray::new(4);
        bits.set_index(0, true);
        bits.set_index(3, true);
        peer.apply_vote_set_bits(5, 0, SignedMsgType::Prevote, &bits);
        assert!(peer.has_vote(0, SignedMsgType::Prevote, 0));
        assert!(peer.has_vote(0, SignedMsgType::Prevote, 3));
        assert!(!peer.has_vote(0, SignedMsgType::Prevote, 1));
    }
}
