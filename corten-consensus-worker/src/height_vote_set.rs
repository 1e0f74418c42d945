//! Per-height vote bookkeeping: one prevote set and one precommit set per
//! round, plus the bookkeeping that bounds how many extra rounds a peer can
//! make this node track.

use corten_consensus_exports::ConsensusError;
use corten_models::bit_array::BitArray;
use corten_models::block_id::BlockId;
use corten_models::validator::ValidatorSet;
use corten_models::vote::{SignedMsgType, Vote};
use corten_models::vote_set::{VoteSet, VoteSetError};
use corten_models::{Height, Round};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

struct RoundVoteSet {
    prevotes: VoteSet,
    precommits: VoteSet,
}

/// All vote sets of one height, keyed by round and type. Peers can introduce
/// at most two rounds beyond the node's own; further claims are dropped.
pub struct HeightVoteSet {
    chain_id: String,
    height: Height,
    validator_set: Arc<ValidatorSet>,
    round: Round,
    round_vote_sets: BTreeMap<Round, RoundVoteSet>,
    peer_catchup_rounds: HashMap<String, Vec<Round>>,
}

impl HeightVoteSet {
    /// Create the bookkeeping for `height`.
    pub fn new(chain_id: &str, height: Height, validator_set: Arc<ValidatorSet>) -> Self {
        let mut hvs = HeightVoteSet {
            chain_id: chain_id.to_string(),
            height,
            validator_set,
            round: 0,
            round_vote_sets: BTreeMap::new(),
            peer_catchup_rounds: HashMap::new(),
        };
        hvs.add_round(0);
        hvs.round = 0;
        hvs
    }

    /// Height being tracked.
    pub fn height(&self) -> Height {
        self.height
    }

    /// Highest round with allocated sets.
    pub fn round(&self) -> Round {
        self.round
    }

    fn add_round(&mut self, round: Round) {
        if self.round_vote_sets.contains_key(&round) {
            return;
        }
        self.round_vote_sets.insert(
            round,
            RoundVoteSet {
                prevotes: VoteSet::new(
                    &self.chain_id,
                    self.height,
                    round,
                    SignedMsgType::Prevote,
                    self.validator_set.clone(),
                ),
                precommits: VoteSet::new(
                    &self.chain_id,
                    self.height,
                    round,
                    SignedMsgType::Precommit,
                    self.validator_set.clone(),
                ),
            },
        );
    }

    /// Allocate sets up to and including `round` + 1, for late votes of the
    /// next round.
    pub fn set_round(&mut self, round: Round) {
        let new_round = self.round.max(round);
        for r in 0..=(new_round + 1) {
            self.add_round(r);
        }
        self.round = new_round;
    }

    /// Add a vote. Rounds beyond the tracked window are only allocated for
    /// peers that have not already used their two catch-up slots.
    pub fn add_vote(
        &mut self,
        vote: &Vote,
        peer_id: Option<&str>,
    ) -> Result<bool, VoteSetError> {
        if !vote.vote_type.is_vote_type() {
            return Err(VoteSetError::InvalidVote("not a vote type".into()));
        }
        if !self.round_vote_sets.contains_key(&vote.round) {
            match peer_id {
                Some(peer) => {
                    let rounds = self.peer_catchup_rounds.entry(peer.to_string()).or_default();
                    if rounds.len() >= 2 && !rounds.contains(&vote.round) {
                        // a peer is only allowed to force two extra rounds
                        return Err(VoteSetError::UnwantedVote(vote.height, vote.round));
                    }
                    if !rounds.contains(&vote.round) {
                        rounds.push(vote.round);
                    }
                    self.add_round(vote.round);
                }
                None => {
                    return Err(VoteSetError::UnwantedVote(vote.height, vote.round));
                }
            }
        }
        let set = self.vote_set_mut(vote.round, vote.vote_type);
        set.add_vote(vote)
    }

    fn vote_set_mut(&mut self, round: Round, vote_type: SignedMsgType) -> &mut VoteSet {
        let entry = self
            .round_vote_sets
            .get_mut(&round)
            .expect("round allocated before access");
        match vote_type {
            SignedMsgType::Precommit => &mut entry.precommits,
            _ => &mut entry.prevotes,
        }
    }

    /// The prevote set of `round`, if allocated.
    pub fn prevotes(&self, round: Round) -> Option<&VoteSet> {
        self.round_vote_sets.get(&round).map(|set| &set.prevotes)
    }

    /// The precommit set of `round`, if allocated.
    pub fn precommits(&self, round: Round) -> Option<&VoteSet> {
        self.round_vote_sets.get(&round).map(|set| &set.precommits)
    }

    /// Mutable precommit set of `round`.
    pub fn precommits_mut(&mut self, round: Round) -> Option<&mut VoteSet> {
        self.round_vote_sets
            .get_mut(&round)
            .map(|set| &mut set.precommits)
    }

    /// The most recent round with a +2/3 prevote majority, with its block.
    pub fn pol_info(&self) -> Option<(Round, BlockId)> {
        for (round, set) in self.round_vote_sets.iter().rev() {
            if let Some(block_id) = set.prevotes.two_thirds_majority() {
                return Some((*round, block_id));
            }
        }
        None
    }

    /// Record a peer's +2/3 claim.
    pub fn set_peer_maj23(
        &mut self,
        round: Round,
        vote_type: SignedMsgType,
        peer_id: &str,
        block_id: BlockId,
    ) -> Result<(), ConsensusError> {
        if !vote_type.is_vote_type() {
            return Err(ConsensusError::InvalidVote("not a vote type".into()));
        }
        self.add_round(round);
        self.vote_set_mut(round, vote_type)
            .set_peer_maj23(peer_id, block_id)
            .map_err(ConsensusError::from)
    }

    /// Which votes this node holds for `block_id` at (round, type).
    pub fn vote_bits(
        &self,
        round: Round,
        vote_type: SignedMsgType,
        block_id: &BlockId,
    ) -> Option<BitArray> {
        let entry = self.round_vote_sets.get(&round)?;
        let set = match vote_type {
            SignedMsgType::Precommit => &entry.precommits,
            _ => &entry.prevotes,
        };
        set.bit_array_by_block_id(block_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corten_hash::Hash;
    use corten_models::address::Address;
    use corten_models::block_id::PartSetHeader;
    use corten_models::validator::Validator;
    use corten_signature::{KeyPair, Signature, SIGNATURE_SIZE_BYTES};
    use corten_time::Timestamp;

    const CHAIN_ID: &str = "hvs-test";

    fn fixture() -> (Vec<KeyPair>, HeightVoteSet) {
        let mut keypairs: Vec<KeyPair> = (0..3).map(|_| KeyPair::generate()).collect();
        keypairs.sort_by_key(|kp| Address::from_public_key(&kp.get_public_key()));
        let validators: Vec<Validator> = keypairs
            .iter()
            .map(|kp| Validator::new(kp.get_public_key(), 10))
            .collect();
        let set = Arc::new(ValidatorSet::new(validators).unwrap());
        (keypairs, HeightVoteSet::new(CHAIN_ID, 1, set))
    }

    fn vote(keypair: &KeyPair, index: i32, round: Round, vote_type: SignedMsgType) -> Vote {
        let mut vote = Vote {
            vote_type,
            height: 1,
            round,
            block_id: BlockId {
                hash: Hash::compute_from(b"block"),
                part_set_header: PartSetHeader {
                    total: 1,
                    hash: Hash::compute_from(b"block"),
                },
            },
            timestamp: Timestamp::from_millis(1),
            validator_address: Address::from_public_key(&keypair.get_public_key()),
            validator_index: index,
            signature: Signature::from_bytes(&[0u8; SIGNATURE_SIZE_BYTES]),
        };
        vote.sign(CHAIN_ID, keypair);
        vote
    }

    #[test]
    fn rounds_allocated_by_set_round() {
        let (keypairs, mut hvs) = fixture();
        hvs.set_round(1);
        // rounds 0..=2 exist
        assert!(hvs
            .add_vote(&vote(&keypairs[0], 0, 2, SignedMsgType::Prevote), None)
            .unwrap());
        // round 3 does not, and internal votes cannot allocate it
        assert!(hvs
            .add_vote(&vote(&keypairs[0], 0, 3, SignedMsgType::Prevote), None)
            .is_err());
    }

    #[test]
    fn peer_catchup_rounds_are_limited() {
        let (keypairs, mut hvs) = fixture();
        for round in [5, 6] {
            assert!(hvs
                .add_vote(
                    &vote(&keypairs[0], 0, round, SignedMsgType::Prevote),
                    Some("peer-1")
                )
                .unwrap());
        }
        // the third unseen round from the same peer is refused
        assert!(hvs
            .add_vote(
                &vote(&keypairs[0], 0, 7, SignedMsgType::Prevote),
                Some("peer-1")
            )
            .is_err());
        // but a round it already opened still works
        assert!(hvs
            .add_vote(
                &vote(&keypairs[1], 1, 5, SignedMsgType::Prevote),
                Some("peer-1")
            )
            .unwrap());
    }

    #[test]
    fn pol_info_finds_latest_majority() {
        let (keypairs, mut hvs) = fixture();
        hvs.set_round(1);
        for (index, keypair) in keypairs.iter().enumerate() {
            hvs.add_vote(
                &vote(keypair, index as i32, 1, SignedMsgType::Prevote),
                None,
            )
            .unwrap();
        }
        let (round, block_id) = hvs.pol_info().unwrap();
        assert_eq!(round, 1);
        assert!(!block_id.is_zero());
    }
}
