//! Vote aggregation for one (height, round, type): quorum detection,
//! double-sign detection, peer majority claims, and commit construction.

use crate::bit_array::BitArray;
use crate::block_id::BlockId;
use crate::validator::ValidatorSet;
use crate::vote::{Commit, CommitSig, SignedMsgType, Vote};
use crate::{Height, Round};
use displaydoc::Display;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by [`VoteSet::add_vote`].
#[non_exhaustive]
#[derive(Display, Error, Debug, Clone)]
pub enum VoteSetError {
    /// vote from unwanted height {0}, round {1} or type
    UnwantedVote(Height, Round),
    /// validator index {0} does not match address {1}
    InvalidValidatorIndex(i32, String),
    /// validator address {0} is not in the validator set
    UnknownValidator(String),
    /// invalid signature: {0}
    InvalidSignature(String),
    /// conflicting votes from validator: first and second bind different blocks
    ConflictingVotes(Box<(Vote, Vote)>),
    /// non-deterministic signature: same validator, same block, different signature
    NonDeterministicSignature,
    /// peer {0} already sent a conflicting +2/3 claim
    ConflictingMajorityClaim(String),
    /// invalid vote: {0}
    InvalidVote(String),
}

/// Votes gathered for one specific block id.
#[derive(Debug, Clone)]
struct BlockVotes {
    peer_maj23: bool,
    bit_array: BitArray,
    votes: Vec<Option<Vote>>,
    sum: i64,
}

impl BlockVotes {
    fn new(peer_maj23: bool, num_validators: usize) -> Self {
        BlockVotes {
            peer_maj23,
            bit_array: BitArray::new(num_validators),
            votes: vec![None; num_validators],
            sum: 0,
        }
    }

    fn add_verified_vote(&mut self, vote: Vote, voting_power: i64) {
        let index = vote.validator_index as usize;
        if index < self.votes.len() && self.votes[index].is_none() {
            self.bit_array.set_index(index, true);
            self.votes[index] = Some(vote);
            self.sum += voting_power;
        }
    }
}

/// All votes of one (height, round, type) across the validator set.
///
/// `votes` is the canonical per-validator index holding the first vote seen
/// (or, once a block reaches +2/3, the vote for that block). `votes_by_block`
/// tracks per-block tallies; conflicting votes are only retained there when a
/// peer claimed a majority for that block, which bounds memory by the peer
/// count.
#[derive(Debug, Clone)]
pub struct VoteSet {
    chain_id: String,
    height: Height,
    round: Round,
    vote_type: SignedMsgType,
    validator_set: Arc<ValidatorSet>,

    votes_bit_array: BitArray,
    votes: Vec<Option<Vote>>,
    sum: i64,
    maj23: Option<BlockId>,
    votes_by_block: BTreeMap<String, BlockVotes>,
    peer_maj23s: BTreeMap<String, BlockId>,
}

impl VoteSet {
    /// Create an empty vote set.
    pub fn new(
        chain_id: &str,
        height: Height,
        round: Round,
        vote_type: SignedMsgType,
        validator_set: Arc<ValidatorSet>,
    ) -> Self {
        let size = validator_set.size();
        VoteSet {
            chain_id: chain_id.to_string(),
            height,
            round,
            vote_type,
            validator_set,
            votes_bit_array: BitArray::new(size),
            votes: vec![None; size],
            sum: 0,
            maj23: None,
            votes_by_block: BTreeMap::new(),
            peer_maj23s: BTreeMap::new(),
        }
    }

    /// Height this set aggregates.
    pub fn height(&self) -> Height {
        self.height
    }

    /// Round this set aggregates.
    pub fn round(&self) -> Round {
        self.round
    }

    /// Vote type this set aggregates.
    pub fn vote_type(&self) -> SignedMsgType {
        self.vote_type
    }

    /// Number of validator slots.
    pub fn size(&self) -> usize {
        self.validator_set.size()
    }

    /// Voting power of validators with at least one accepted vote.
    pub fn sum(&self) -> i64 {
        self.sum
    }

    /// Bit array of validators with an accepted canonical vote.
    pub fn bit_array(&self) -> BitArray {
        self.votes_bit_array.clone()
    }

    /// Bit array of votes gathered for one specific block id.
    pub fn bit_array_by_block_id(&self, block_id: &BlockId) -> Option<BitArray> {
        self.votes_by_block
            .get(&block_id.key())
            .map(|votes| votes.bit_array.clone())
    }

    /// The canonical vote of a validator, if any.
    pub fn get_by_index(&self, index: usize) -> Option<&Vote> {
        self.votes.get(index).and_then(|slot| slot.as_ref())
    }

    /// Add a vote. Returns `true` when the vote was new and accepted.
    ///
    /// A second, conflicting vote from the same validator yields
    /// [`VoteSetError::ConflictingVotes`] carrying both votes so the caller
    /// can turn the pair into evidence; the canonical index keeps the first.
    pub fn add_vote(&mut self, vote: &Vote) -> Result<bool, VoteSetError> {
        if vote.height != self.height
            || vote.round != self.round
            || vote.vote_type != self.vote_type
        {
            return Err(VoteSetError::UnwantedVote(vote.height, vote.round));
        }
        vote.validate_basic()
            .map_err(|err| VoteSetError::InvalidVote(err.to_string()))?;

        let index = vote.validator_index as usize;
        let validator = self
            .validator_set
            .get_by_index(index)
            .ok_or_else(|| VoteSetError::UnknownValidator(vote.validator_address.to_string()))?
            .clone();
        if validator.address != vote.validator_address {
            return Err(VoteSetError::InvalidValidatorIndex(
                vote.validator_index,
                vote.validator_address.to_string(),
            ));
        }

        // Deduplicate before paying for signature verification.
        if let Some(existing) = self.get_by_index(index) {
            if existing.block_id == vote.block_id {
                return if existing.signature == vote.signature {
                    Ok(false)
                } else {
                    Err(VoteSetError::NonDeterministicSignature)
                };
            }
        }

        vote.verify(&self.chain_id, &validator.pub_key)
            .map_err(|err| VoteSetError::InvalidSignature(err.to_string()))?;

        self.add_verified_vote(vote.clone(), validator.voting_power)
    }

    fn add_verified_vote(
        &mut self,
        vote: Vote,
        voting_power: i64,
    ) -> Result<bool, VoteSetError> {
        let index = vote.validator_index as usize;
        let block_key = vote.block_id.key();

        if let Some(existing) = self.votes.get(index).and_then(|slot| slot.clone()) {
            if existing.block_id != vote.block_id {
                // Record the second vote in the block bucket only if a peer
                // told us to track that block; either way surface the pair.
                let track = self
                    .votes_by_block
                    .get(&block_key)
                    .map(|votes| votes.peer_maj23)
                    .unwrap_or(false);
                if track {
                    let num_validators = self.size();
                    self.votes_by_block
                        .entry(block_key)
                        .or_insert_with(|| BlockVotes::new(true, num_validators))
                        .add_verified_vote(vote.clone(), voting_power);
                }
                return Err(VoteSetError::ConflictingVotes(Box::new((existing, vote))));
            }
            return Ok(false);
        }

        // First vote from this validator.
        self.votes[index] = Some(vote.clone());
        self.votes_bit_array.set_index(index, true);
        self.sum += voting_power;

        let num_validators = self.size();
        let votes_by_block = self
            .votes_by_block
            .entry(block_key.clone())
            .or_insert_with(|| BlockVotes::new(false, num_validators));
        votes_by_block.add_verified_vote(vote.clone(), voting_power);

        // Quorum is sticky: maj23 never changes once set.
        let quorum = self.validator_set.total_voting_power() * 2 / 3 + 1;
        if self.maj23.is_none() && votes_by_block.sum >= quorum {
            self.maj23 = Some(vote.block_id);
            // Promote the winning block's votes into the canonical index.
            let winning: Vec<Vote> = votes_by_block
                .votes
                .iter()
                .flatten()
                .cloned()
                .collect();
            for winning_vote in winning {
                let slot = winning_vote.validator_index as usize;
                self.votes_bit_array.set_index(slot, true);
                self.votes[slot] = Some(winning_vote);
            }
        }
        Ok(true)
    }

    /// Record a peer's claim of a +2/3 majority for `block_id`. Each peer may
    /// claim exactly one block per set.
    pub fn set_peer_maj23(
        &mut self,
        peer_id: &str,
        block_id: BlockId,
    ) -> Result<(), VoteSetError> {
        if let Some(existing) = self.peer_maj23s.get(peer_id) {
            if *existing == block_id {
                return Ok(());
            }
            return Err(VoteSetError::ConflictingMajorityClaim(peer_id.to_string()));
        }
        self.peer_maj23s.insert(peer_id.to_string(), block_id);

        let block_key = block_id.key();
        let num_validators = self.size();
        self.votes_by_block
            .entry(block_key)
            .or_insert_with(|| BlockVotes::new(true, num_validators))
            .peer_maj23 = true;
        Ok(())
    }

    /// The block id with +2/3, once one exists.
    pub fn two_thirds_majority(&self) -> Option<BlockId> {
        self.maj23
    }

    /// True when votes totalling more than 2/3 of the power have been seen,
    /// regardless of the block they bind.
    pub fn has_two_thirds_any(&self) -> bool {
        self.sum > self.validator_set.total_voting_power() * 2 / 3
    }

    /// True when every validator has voted.
    pub fn has_all(&self) -> bool {
        self.sum == self.validator_set.total_voting_power()
    }

    /// Build the commit from a precommit set that reached +2/3 for a block.
    pub fn make_commit(&self) -> Result<Commit, VoteSetError> {
        if self.vote_type != SignedMsgType::Precommit {
            return Err(VoteSetError::InvalidVote(
                "cannot make a commit from a non-precommit vote set".into(),
            ));
        }
        let maj23 = self.maj23.ok_or_else(|| {
            VoteSetError::InvalidVote("cannot make a commit without a +2/3 majority".into())
        })?;
        let signatures = self
            .votes
            .iter()
            .map(|slot| match slot {
                Some(vote) if vote.block_id == maj23 || vote.block_id.is_zero() => vote
                    .to_commit_sig()
                    .unwrap_or_else(|_| CommitSig::absent()),
                _ => CommitSig::absent(),
            })
            .collect();
        Ok(Commit {
            height: self.height,
            round: self.round,
            block_id: maj23,
            signatures,
        })
    }
}
