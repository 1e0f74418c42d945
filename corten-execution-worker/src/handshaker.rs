//! Restart reconciliation between the application and the block store.

use crate::block_executor::BlockExecutor;
use corten_execution_exports::{Application, ExecutionError, ExecutionResult};
use corten_hash::merkle;
use corten_models::abci::{RequestInfo, RequestInitChain, ValidatorUpdate};
use corten_models::genesis::GenesisDoc;
use corten_models::state::State;
use corten_models::validator::ValidatorSet;
use corten_storage::{BlockStore, StateStore};
use std::sync::Arc;
use tracing::info;

/// Version identifiers reported to the application on handshake.
const ENGINE_VERSION: &str = "0.35.6";
const BLOCK_PROTOCOL_VERSION: u64 = 11;
const P2P_PROTOCOL_VERSION: u64 = 8;
const ABCI_VERSION: &str = "0.17.0";

/// On startup, queries the application for its last committed height, runs
/// `init_chain` on a fresh chain, and replays stored blocks the application
/// missed. Failures during block application are thereby recovered: the
/// store is ahead of the application by at most one block, which is
/// re-applied here.
pub struct Handshaker {
    block_store: BlockStore,
    state_store: StateStore,
    genesis: GenesisDoc,
    replayed_blocks: usize,
}

impl Handshaker {
    /// Create a handshaker for one startup.
    pub fn new(block_store: BlockStore, state_store: StateStore, genesis: GenesisDoc) -> Self {
        Handshaker {
            block_store,
            state_store,
            genesis,
            replayed_blocks: 0,
        }
    }

    /// Number of blocks replayed into the application.
    pub fn replayed_blocks(&self) -> usize {
        self.replayed_blocks
    }

    /// Run the handshake, returning the reconciled state the consensus
    /// machine should resume from.
    pub fn handshake(
        &mut self,
        app: Arc<dyn Application>,
        executor: &BlockExecutor,
        mut state: State,
    ) -> ExecutionResult<State> {
        let response = app.info(RequestInfo {
            version: ENGINE_VERSION.to_string(),
            block_version: BLOCK_PROTOCOL_VERSION,
            p2p_version: P2P_PROTOCOL_VERSION,
            abci_version: ABCI_VERSION.to_string(),
        });
        if response.last_block_height < 0 {
            return Err(ExecutionError::Handshake(
                "application reported a negative last block height".into(),
            ));
        }
        info!(
            app_height = response.last_block_height,
            app_version = response.app_version,
            "application handshake info"
        );
        if state.last_block_height == 0 {
            state.version.app = response.app_version;
        }

        state = self.replay_blocks(app, executor, state, response.last_block_height)?;
        info!(
            replayed = self.replayed_blocks,
            height = state.last_block_height,
            "completed application handshake"
        );
        Ok(state)
    }

    fn replay_blocks(
        &mut self,
        app: Arc<dyn Application>,
        executor: &BlockExecutor,
        mut state: State,
        app_height: i64,
    ) -> ExecutionResult<State> {
        let store_base = self.block_store.base()?;
        let store_height = self.block_store.height()?;
        let state_height = state.last_block_height;
        info!(
            app_height, store_height, state_height,
            "replaying blocks to the application"
        );

        if app_height == 0 {
            state = self.init_chain(app.clone(), state)?;
        }
        if store_height == 0 {
            return Ok(state);
        }

        if app_height > 0 && app_height < store_base - 1 {
            return Err(ExecutionError::Handshake(format!(
                "application height {} is below the store base {}",
                app_height, store_base
            )));
        }
        if store_height < app_height {
            return Err(ExecutionError::Handshake(format!(
                "application height {} is above the store height {}",
                app_height, store_height
            )));
        }
        if store_height < state_height || store_height > state_height + 1 {
            return Err(ExecutionError::Handshake(format!(
                "store height {} inconsistent with state height {}",
                store_height, state_height
            )));
        }

        // blocks the state already covers are replayed against the
        // application only: begin/deliver/end/commit, no state mutation
        let replay_from = app_height.max(store_base - 1).max(0) + 1;
        for height in replay_from..=state_height {
            let block = self.block_store.load_block(height)?.ok_or_else(|| {
                ExecutionError::Handshake(format!("missing stored block {}", height))
            })?;
            info!(height, "replaying stored block to the application");
            executor.exec_block_on_app(&state, &block)?;
            let commit_response = app.commit();
            if height == state_height && commit_response.data != state.app_hash {
                return Err(ExecutionError::Handshake(format!(
                    "application hash after replay of {} does not match the state",
                    height
                )));
            }
            self.replayed_blocks += 1;
        }

        // a stored block past the state (crash between save_block and the
        // state save) is applied in full
        if store_height == state_height + 1 {
            let block = self.block_store.load_block(store_height)?.ok_or_else(|| {
                ExecutionError::Handshake(format!("missing stored block {}", store_height))
            })?;
            let block_id = match self.block_store.load_block_meta(store_height)? {
                Some(meta) => meta.block_id,
                None => {
                    return Err(ExecutionError::Handshake(format!(
                        "missing stored block meta {}",
                        store_height
                    )))
                }
            };
            info!(height = store_height, "applying the stored block past the state");
            state = executor.apply_block(&state, block_id, &block)?;
            self.replayed_blocks += 1;
        }
        Ok(state)
    }

    /// Drive `init_chain` on a fresh application and adopt its overrides.
    fn init_chain(&self, app: Arc<dyn Application>, mut state: State) -> ExecutionResult<State> {
        let validators: Vec<ValidatorUpdate> = self
            .genesis
            .validators
            .iter()
            .map(|genesis_val| ValidatorUpdate {
                pub_key: genesis_val.pub_key,
                power: genesis_val.power,
            })
            .collect();
        let response = app.init_chain(RequestInitChain {
            time: self.genesis.genesis_time,
            chain_id: self.genesis.chain_id.clone(),
            initial_height: self.genesis.initial_height,
            consensus_params: state.consensus_params.clone(),
            validators,
            app_state_bytes: serde_json::to_vec(&self.genesis.app_state)
                .map_err(|err| ExecutionError::Handshake(err.to_string()))?,
        });

        if state.last_block_height == 0 {
            if !response.app_hash.is_empty() {
                state.app_hash = response.app_hash;
            }
            if !response.validators.is_empty() {
                let validators: Vec<_> = response
                    .validators
                    .iter()
                    .map(|update| update.to_validator())
                    .collect();
                let validator_set = ValidatorSet::new(validators)
                    .map_err(|err| ExecutionError::Handshake(err.to_string()))?;
                state.next_validators = validator_set
                    .copy_increment_proposer_priority(1)
                    .map_err(|err| ExecutionError::Handshake(err.to_string()))?;
                state.validators = validator_set;
            } else if self.genesis.validators.is_empty() {
                return Err(ExecutionError::Handshake(
                    "validator set is empty in genesis and still empty after init_chain".into(),
                ));
            }
            if let Some(update) = response.consensus_params {
                state.consensus_params = state.consensus_params.update(&update);
                state
                    .consensus_params
                    .validate()
                    .map_err(|err| ExecutionError::Handshake(err.to_string()))?;
            }
            state.last_results_hash = merkle::empty_hash();
            self.state_store.save(&state)?;
        }
        Ok(state)
    }
}
