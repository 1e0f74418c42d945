//! Block validation and application.

use corten_execution_exports::{
    Application, ConsensusEvent, EventBus, ExecutionError, ExecutionResult,
};
use corten_hash::Hash;
use corten_logging::corten_trace;
use corten_models::abci::{
    self, AbciResponses, LastCommitInfo, RequestBeginBlock, ValidatorUpdate, VoteInfo,
};
use corten_models::address::Address;
use corten_models::block::Block;
use corten_models::block_id::BlockId;
use corten_models::evidence::EvidenceList;
use corten_models::part_set::PartSet;
use corten_models::state::State;
use corten_models::validator::Validator;
use corten_models::vote::Commit;
use corten_models::Height;
use corten_pool_exports::{EvidencePoolController, TxPoolController};
use corten_storage::{BlockStore, StateStore};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Overhead subtracted from the block byte budget for the header, the
/// last commit (one slot per validator), and framing.
fn max_data_bytes(max_bytes: i64, evidence_bytes: i64, validator_count: usize) -> i64 {
    const HEADER_OVERHEAD: i64 = 1024;
    const PER_COMMIT_SIG_OVERHEAD: i64 = 128;
    (max_bytes - HEADER_OVERHEAD - evidence_bytes
        - PER_COMMIT_SIG_OVERHEAD * validator_count as i64)
        .max(0)
}

/// Executes decided blocks against the application and advances the
/// persisted state. `apply_block` is the single point of commitment.
pub struct BlockExecutor {
    state_store: StateStore,
    block_store: BlockStore,
    app: Arc<dyn Application>,
    tx_pool: Arc<dyn TxPoolController>,
    evidence_pool: Arc<dyn EvidencePoolController>,
    event_bus: EventBus,
    // verification results for the current height only
    validation_cache: Mutex<HashSet<Hash>>,
}

impl BlockExecutor {
    /// Create an executor over the given collaborators.
    pub fn new(
        state_store: StateStore,
        block_store: BlockStore,
        app: Arc<dyn Application>,
        tx_pool: Arc<dyn TxPoolController>,
        evidence_pool: Arc<dyn EvidencePoolController>,
        event_bus: EventBus,
    ) -> Self {
        BlockExecutor {
            state_store,
            block_store,
            app,
            tx_pool,
            evidence_pool,
            event_bus,
            validation_cache: Mutex::new(HashSet::new()),
        }
    }

    /// The event bus blocks are announced on.
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Assemble a proposal block for `height`: pending evidence first, then
    /// a gas- and byte-bounded batch of transactions from the pool.
    pub fn create_proposal_block(
        &self,
        height: Height,
        state: &State,
        last_commit: Commit,
        proposer_address: Address,
    ) -> ExecutionResult<(Block, PartSet)> {
        let max_bytes = state.consensus_params.block.max_bytes;
        let max_gas = state.consensus_params.block.max_gas;
        let (evidence, evidence_bytes) = self
            .evidence_pool
            .pending_evidence(state.consensus_params.evidence.max_bytes);
        let data_budget = max_data_bytes(max_bytes, evidence_bytes, state.validators.size());
        let txs = self.tx_pool.reap_max_bytes_max_gas(data_budget, max_gas);
        let (block, parts) = state.make_block(
            height,
            txs,
            last_commit,
            EvidenceList { evidence },
            proposer_address,
        )?;
        Ok((block, parts))
    }

    /// Validate a proposed block against the current state. Results are
    /// cached until the next commit.
    pub fn validate_block(&self, state: &State, block: &Block) -> ExecutionResult<()> {
        let block_hash = block.hash();
        if self.validation_cache.lock().contains(&block_hash) {
            return Ok(());
        }

        block.validate_basic()?;

        if state.last_block_height == 0 && block.header.height != state.initial_height {
            return Err(ExecutionError::InvalidBlock(format!(
                "wrong height {}: expected the initial height {}",
                block.header.height, state.initial_height
            )));
        }
        if state.last_block_height > 0 && block.header.height != state.last_block_height + 1 {
            return Err(ExecutionError::InvalidBlock(format!(
                "wrong height {}: expected {}",
                block.header.height,
                state.last_block_height + 1
            )));
        }
        if block.header.chain_id != state.chain_id {
            return Err(ExecutionError::InvalidBlock("wrong chain id".into()));
        }
        if state.last_block_height > 0 && block.header.last_block_id != state.last_block_id {
            return Err(ExecutionError::InvalidBlock("wrong last block id".into()));
        }
        if block.header.app_hash != state.app_hash {
            return Err(ExecutionError::InvalidBlock("wrong app hash".into()));
        }
        if block.header.consensus_hash != state.consensus_params.hash() {
            return Err(ExecutionError::InvalidBlock("wrong consensus hash".into()));
        }
        if block.header.last_results_hash != state.last_results_hash {
            return Err(ExecutionError::InvalidBlock(
                "wrong last results hash".into(),
            ));
        }
        if block.header.validators_hash != state.validators.hash() {
            return Err(ExecutionError::InvalidBlock("wrong validators hash".into()));
        }
        if block.header.next_validators_hash != state.next_validators.hash() {
            return Err(ExecutionError::InvalidBlock(
                "wrong next validators hash".into(),
            ));
        }

        // block time: monotone past the first height, genesis time at it
        if block.header.height > state.initial_height {
            if block.header.time <= state.last_block_time {
                return Err(ExecutionError::InvalidBlock(
                    "block time is not greater than the last block time".into(),
                ));
            }
            let median = State::median_time(&block.last_commit, &state.last_validators);
            if block.header.time != median {
                return Err(ExecutionError::InvalidBlock(format!(
                    "block time {} differs from the commit median {}",
                    block.header.time, median
                )));
            }
        } else if block.header.time != state.last_block_time {
            return Err(ExecutionError::InvalidBlock(
                "first block time differs from the genesis time".into(),
            ));
        }

        // last commit carries +2/3 of the set that signed the parent
        if block.header.height > state.initial_height {
            state.last_validators.verify_commit_light(
                &state.chain_id,
                &state.last_block_id,
                block.header.height - 1,
                &block.last_commit,
            )?;
        } else if block.last_commit.size() != 0 {
            return Err(ExecutionError::InvalidBlock(
                "the first block cannot carry a last commit".into(),
            ));
        }

        self.evidence_pool
            .check_evidence(&block.evidence)
            .map_err(|err| ExecutionError::InvalidBlock(err.to_string()))?;

        self.validation_cache.lock().insert(block_hash);
        Ok(())
    }

    /// Apply a decided block: run it through the application, persist the
    /// responses and the new state, update the pools, prune, and publish
    /// events. Returns the state after the block.
    pub fn apply_block(
        &self,
        state: &State,
        block_id: BlockId,
        block: &Block,
    ) -> ExecutionResult<State> {
        self.validate_block(state, block)?;

        let responses = self.exec_block_on_app(state, block)?;
        self.state_store
            .save_abci_responses(block.header.height, &responses)?;

        let updates = Self::validate_validator_updates(&responses.end_block.validator_updates)?;
        if !updates.is_empty() {
            debug!(count = updates.len(), "updates to validators");
        }
        let mut new_state = self.update_state(state, block_id, block, &responses, &updates)?;

        // the application commits; from its point of view the block is final
        let commit_response = self.app.commit();
        info!(
            height = block.header.height,
            num_txs = block.data.txs.len(),
            app_hash = %Hash::compute_from(&commit_response.data),
            "committed state"
        );
        new_state.app_hash = commit_response.data;

        self.evidence_pool
            .update(&new_state, &block.evidence)
            .map_err(|err| ExecutionError::Application(err.to_string()))?;

        self.state_store.save(&new_state)?;

        if let Err(err) = self.tx_pool.update(
            block.header.height,
            &block.data.txs,
            &responses.deliver_txs,
            None,
            None,
        ) {
            error!("tx pool update failed: {}", err);
        }

        if commit_response.retain_height > 0 {
            match self.prune_blocks(commit_response.retain_height) {
                Ok(pruned) if pruned > 0 => {
                    debug!(
                        pruned,
                        retain_height = commit_response.retain_height,
                        "pruned blocks"
                    )
                }
                Ok(_) => {}
                Err(err) => error!("failed to prune block store: {}", err),
            }
        }

        self.validation_cache.lock().clear();

        self.fire_events(block, block_id, &responses, &updates);
        Ok(new_state)
    }

    /// Drive begin-block, the transaction sequence, and end-block.
    pub(crate) fn exec_block_on_app(
        &self,
        state: &State,
        block: &Block,
    ) -> ExecutionResult<AbciResponses> {
        let last_commit_info = self.build_last_commit_info(state, block)?;
        let mut byzantine_validators = Vec::new();
        for evidence in &block.evidence.evidence {
            byzantine_validators.extend(evidence.to_abci());
        }

        let begin_block = self.app.begin_block(RequestBeginBlock {
            hash: block.hash(),
            header: block.header.clone(),
            last_commit_info,
            byzantine_validators,
        });

        let mut deliver_txs = Vec::with_capacity(block.data.txs.len());
        let mut valid_txs = 0usize;
        let mut invalid_txs = 0usize;
        for tx in &block.data.txs {
            let response = self.app.deliver_tx(tx);
            if response.is_ok() {
                valid_txs += 1;
            } else {
                debug!(code = response.code, "invalid tx");
                invalid_txs += 1;
            }
            deliver_txs.push(response);
        }

        let end_block = self.app.end_block(block.header.height);

        info!(
            height = block.header.height,
            valid_txs, invalid_txs, "executed block"
        );
        corten_trace!(
            "executor.executed_block",
            height = block.header.height,
            valid = valid_txs,
            invalid = invalid_txs
        );
        Ok(AbciResponses {
            begin_block,
            deliver_txs,
            end_block,
        })
    }

    /// Participation of the last validator set in the embedded commit.
    fn build_last_commit_info(
        &self,
        state: &State,
        block: &Block,
    ) -> ExecutionResult<LastCommitInfo> {
        if block.header.height == state.initial_height {
            return Ok(LastCommitInfo {
                round: 0,
                votes: Vec::new(),
            });
        }
        let last_validators = self
            .state_store
            .load_validators(block.header.height - 1)?
            .ok_or_else(|| {
                ExecutionError::InvalidBlock(format!(
                    "no validator set stored for height {}",
                    block.header.height - 1
                ))
            })?;
        if block.last_commit.size() != last_validators.size() {
            return Err(ExecutionError::InvalidBlock(format!(
                "commit size {} does not match validator set size {}",
                block.last_commit.size(),
                last_validators.size()
            )));
        }
        let votes = last_validators
            .validators
            .iter()
            .zip(block.last_commit.signatures.iter())
            .map(|(validator, sig)| VoteInfo {
                validator: abci::AbciValidator {
                    address: validator.address,
                    power: validator.voting_power,
                },
                signed_last_block: !sig.is_absent(),
            })
            .collect();
        Ok(LastCommitInfo {
            round: block.last_commit.round,
            votes,
        })
    }

    /// Reject unusable validator updates before touching the set.
    fn validate_validator_updates(
        updates: &[ValidatorUpdate],
    ) -> ExecutionResult<Vec<Validator>> {
        let mut validators = Vec::with_capacity(updates.len());
        for update in updates {
            if update.power < 0 {
                return Err(ExecutionError::InvalidValidatorUpdate(format!(
                    "voting power can't be negative: {}",
                    update.power
                )));
            }
            // key typing is enforced by the PublicKey representation; only
            // ed25519 keys can reach this point
            validators.push(update.to_validator());
        }
        Ok(validators)
    }

    /// Produce the post-block state: shifted validator sets, updated
    /// parameters, new results hash.
    fn update_state(
        &self,
        state: &State,
        block_id: BlockId,
        block: &Block,
        responses: &AbciResponses,
        validator_updates: &[Validator],
    ) -> ExecutionResult<State> {
        let header = &block.header;

        let mut next_validators = state.next_validators.clone();
        let mut last_height_validators_changed = state.last_height_validators_changed;
        if !validator_updates.is_empty() {
            next_validators
                .update_with_change_set(validator_updates.to_vec(), true)
                .map_err(|err| ExecutionError::InvalidValidatorUpdate(err.to_string()))?;
            last_height_validators_changed = header.height + 2;
        }
        next_validators
            .increment_proposer_priority(1)
            .map_err(|err| ExecutionError::InvalidValidatorUpdate(err.to_string()))?;

        let mut consensus_params = state.consensus_params.clone();
        let mut last_height_params_changed = state.last_height_consensus_params_changed;
        if let Some(update) = &responses.end_block.consensus_param_updates {
            consensus_params = consensus_params.update(update);
            consensus_params
                .validate()
                .map_err(|err| ExecutionError::InvalidBlock(err.to_string()))?;
            last_height_params_changed = header.height + 1;
        }

        Ok(State {
            version: state.version,
            chain_id: state.chain_id.clone(),
            initial_height: state.initial_height,
            last_block_height: header.height,
            last_block_id: block_id,
            last_block_time: header.time,
            validators: state.next_validators.clone(),
            next_validators,
            last_validators: state.validators.clone(),
            last_height_validators_changed,
            consensus_params,
            last_height_consensus_params_changed: last_height_params_changed,
            last_results_hash: abci::results_hash(&responses.deliver_txs),
            app_hash: Vec::new(),
        })
    }

    /// Prune blocks and per-height state below `retain_height`.
    pub fn prune_blocks(&self, retain_height: Height) -> ExecutionResult<u64> {
        let pruned = self.block_store.prune_blocks(retain_height)?;
        self.state_store.prune_states(retain_height)?;
        Ok(pruned)
    }

    /// Publish the committed block in event order: block, header, per-tx,
    /// per-evidence, validator updates.
    fn fire_events(
        &self,
        block: &Block,
        block_id: BlockId,
        responses: &AbciResponses,
        validator_updates: &[Validator],
    ) {
        self.event_bus.publish(ConsensusEvent::NewBlock {
            block: Box::new(block.clone()),
            block_id,
        });
        self.event_bus.publish(ConsensusEvent::NewBlockHeader {
            header: block.header.clone(),
            num_txs: block.data.txs.len() as i64,
        });
        for (index, tx) in block.data.txs.iter().enumerate() {
            self.event_bus.publish(ConsensusEvent::Tx {
                height: block.header.height,
                index: index as u32,
                tx: tx.clone(),
                result: responses
                    .deliver_txs
                    .get(index)
                    .cloned()
                    .unwrap_or_default(),
            });
        }
        for evidence in &block.evidence.evidence {
            self.event_bus.publish(ConsensusEvent::NewEvidence {
                evidence: Box::new(evidence.clone()),
                height: block.header.height,
            });
        }
        if !validator_updates.is_empty() {
            self.event_bus.publish(ConsensusEvent::ValidatorSetUpdates {
                updates: validator_updates.to_vec(),
            });
        }
    }
}
