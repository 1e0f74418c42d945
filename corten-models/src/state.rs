//! The consensus state snapshot persisted at the end of each height.

use crate::block::{Block, BlockHeader, Data, Tx, Version};
use crate::block_id::BlockId;
use crate::consensus_params::ConsensusParams;
use crate::error::ModelsError;
use crate::evidence::EvidenceList;
use crate::genesis::GenesisDoc;
use crate::part_set::PartSet;
use crate::validator::{Validator, ValidatorSet};
use crate::vote::Commit;
use crate::{address::Address, Height};
use corten_hash::{merkle, Hash};
use corten_time::Timestamp;

/// Everything needed to validate and extend the chain after some height H:
/// `validators` signs H+1, `next_validators` signs H+2, and
/// `last_validators` (the set that signed H) verifies H's commit on replay.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct State {
    /// Protocol versions.
    pub version: Version,
    /// Chain identifier.
    pub chain_id: String,
    /// First block height of this chain.
    pub initial_height: Height,
    /// Last committed height, `0` before the first commit.
    pub last_block_height: Height,
    /// Id of the last committed block.
    pub last_block_id: BlockId,
    /// Time of the last committed block (genesis time before the first).
    pub last_block_time: Timestamp,
    /// Validator set of height `last_block_height + 1`.
    pub validators: ValidatorSet,
    /// Validator set of height `last_block_height + 2`.
    pub next_validators: ValidatorSet,
    /// Validator set that signed `last_block_height`.
    pub last_validators: ValidatorSet,
    /// Height whose block last changed the validator set.
    pub last_height_validators_changed: Height,
    /// Current consensus parameters.
    pub consensus_params: ConsensusParams,
    /// Height whose block last changed the parameters.
    pub last_height_consensus_params_changed: Height,
    /// Merkle root of the last block's deliver-tx results.
    pub last_results_hash: Hash,
    /// Application hash after the last block.
    pub app_hash: Vec<u8>,
}

impl State {
    /// Build the state implied by a genesis document.
    pub fn from_genesis(genesis: &GenesisDoc) -> Result<Self, ModelsError> {
        let params = genesis.consensus_params.clone().unwrap_or_default();
        params.validate()?;
        let validators: Vec<Validator> = genesis
            .validators
            .iter()
            .map(|genesis_val| Validator::new(genesis_val.pub_key, genesis_val.power))
            .collect();
        let validator_set = ValidatorSet::new(validators)?;
        let next_validators = validator_set.copy_increment_proposer_priority(1)?;
        Ok(State {
            version: Version { block: 11, app: 0 },
            chain_id: genesis.chain_id.clone(),
            initial_height: genesis.initial_height,
            last_block_height: 0,
            last_block_id: BlockId::ZERO,
            last_block_time: genesis.genesis_time,
            validators: validator_set.clone(),
            next_validators,
            last_validators: ValidatorSet::empty(),
            last_height_validators_changed: genesis.initial_height,
            consensus_params: params,
            last_height_consensus_params_changed: genesis.initial_height,
            last_results_hash: merkle::empty_hash(),
            app_hash: genesis.app_hash.clone().unwrap_or_default(),
        })
    }

    /// True before any block has been committed.
    pub fn is_empty(&self) -> bool {
        self.last_block_height == 0
    }

    /// BFT time: the voting-power-weighted median of the commit's vote
    /// timestamps, computed over the set that signed it.
    pub fn median_time(commit: &Commit, voters: &ValidatorSet) -> Timestamp {
        let mut weighted: Vec<(Timestamp, i64)> = Vec::new();
        let mut total: i64 = 0;
        for sig in commit.signatures.iter().filter(|sig| !sig.is_absent()) {
            if let Some(val) = voters.get_by_address(&sig.validator_address) {
                weighted.push((sig.timestamp, val.voting_power));
                total += val.voting_power;
            }
        }
        weighted.sort_by_key(|(timestamp, _)| *timestamp);
        let mut cumulative: i64 = 0;
        for (timestamp, power) in &weighted {
            cumulative += power;
            if cumulative * 2 >= total {
                return *timestamp;
            }
        }
        Timestamp::ZERO
    }

    /// Assemble the next proposal block from reaped transactions, pending
    /// evidence, and the last commit, stamping every header digest from this
    /// snapshot.
    pub fn make_block(
        &self,
        height: Height,
        txs: Vec<Tx>,
        last_commit: Commit,
        evidence: EvidenceList,
        proposer_address: Address,
    ) -> Result<(Block, PartSet), ModelsError> {
        let time = if height == self.initial_height {
            self.last_block_time
        } else {
            Self::median_time(&last_commit, &self.last_validators)
        };
        let data = Data { txs };
        let header = BlockHeader {
            version: self.version,
            chain_id: self.chain_id.clone(),
            height,
            time,
            last_block_id: self.last_block_id,
            last_commit_hash: last_commit.hash(),
            data_hash: data.hash(),
            validators_hash: self.validators.hash(),
            next_validators_hash: self.next_validators.hash(),
            consensus_hash: self.consensus_params.hash(),
            app_hash: self.app_hash.clone(),
            last_results_hash: self.last_results_hash,
            evidence_hash: evidence.hash(),
            proposer_address,
        };
        let block = Block {
            header,
            data,
            evidence,
            last_commit,
        };
        let parts = block.make_part_set()?;
        Ok((block, parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::GenesisValidator;
    use crate::vote::{CommitSig, SignedMsgType, Vote};
    use corten_signature::{KeyPair, Signature, SIGNATURE_SIZE_BYTES};

    fn genesis_fixture(count: usize) -> (Vec<KeyPair>, GenesisDoc) {
        let keypairs: Vec<KeyPair> = (0..count).map(|_| KeyPair::generate()).collect();
        let validators = keypairs
            .iter()
            .map(|kp| GenesisValidator {
                address: None,
                pub_key: kp.get_public_key(),
                power: 10,
                name: None,
            })
            .collect();
        let genesis = GenesisDoc {
            genesis_time: Timestamp::from_millis(1_000),
            chain_id: "test-chain".into(),
            initial_height: 1,
            consensus_params: None,
            validators,
            app_state: serde_json::Value::Null,
            app_hash: None,
        };
        (keypairs, genesis)
    }

    #[test]
    fn genesis_state_shape() {
        let (_, genesis) = genesis_fixture(4);
        let state = State::from_genesis(&genesis).unwrap();
        assert!(state.is_empty());
        assert_eq!(state.validators.size(), 4);
        assert_eq!(state.last_validators.size(), 0);
        assert_eq!(state.last_results_hash, merkle::empty_hash());
        // next set is the current set rotated once
        assert_eq!(state.next_validators.hash(), state.validators.hash());
    }

    #[test]
    fn median_time_is_power_weighted() {
        let keypairs: Vec<KeyPair> = (0..3).map(|_| KeyPair::generate()).collect();
        let powers = [1i64, 1, 10];
        let validators: Vec<Validator> = keypairs
            .iter()
            .zip(powers)
            .map(|(kp, power)| Validator::new(kp.get_public_key(), power))
            .collect();
        let set = ValidatorSet::new(validators).unwrap();

        let mut commit = Commit::empty();
        commit.height = 1;
        for (index, keypair) in keypairs.iter().enumerate() {
            let vote = Vote {
                vote_type: SignedMsgType::Precommit,
                height: 1,
                round: 0,
                block_id: BlockId::ZERO,
                timestamp: Timestamp::from_millis(if index == 2 { 9_000 } else { 1_000 }),
                validator_address: Address::from_public_key(&keypair.get_public_key()),
                validator_index: index as i32,
                signature: Signature::from_bytes(&[0u8; SIGNATURE_SIZE_BYTES]),
            };
            commit.signatures.push(CommitSig {
                flag: crate::vote::BlockIdFlag::Nil,
                validator_address: vote.validator_address,
                timestamp: vote.timestamp,
                signature: Some(vote.signature),
            });
        }
        let median = State::median_time(&commit, &set);
        // the heavy validator dominates the median
        assert_eq!(median, Timestamp::from_millis(9_000));
    }

    #[test]
    fn make_block_stamps_digests() {
        let (_, genesis) = genesis_fixture(2);
        let state = State::from_genesis(&genesis).unwrap();
        let proposer = state.validators.validators[0].address;
        let (block, parts) = state
            .make_block(
                1,
                vec![Tx(vec![1, 2, 3])],
                Commit::empty(),
                EvidenceList::default(),
                proposer,
            )
            .unwrap();
        assert_eq!(block.header.height, 1);
        // the first block carries genesis time
        assert_eq!(block.header.time, Timestamp::from_millis(1_000));
        assert_eq!(block.header.validators_hash, state.validators.hash());
        assert!(parts.is_complete());
        block.validate_basic().unwrap();
    }
}
