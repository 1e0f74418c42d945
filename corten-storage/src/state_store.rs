//! Persistence of the consensus state snapshot and the per-height records
//! needed for replay and evidence verification: validator sets, consensus
//! parameters, and application-interface responses.

use crate::error::{StoreError, StoreResult};
use crate::keys;
use corten_db::{DbBatch, DbController};
use corten_models::abci::AbciResponses;
use corten_models::consensus_params::ConsensusParams;
use corten_models::state::State;
use corten_models::validator::ValidatorSet;
use corten_models::Height;
use std::sync::Arc;
use tracing::debug;

/// State persistence over a [`DbController`].
#[derive(Clone)]
pub struct StateStore {
    db: Arc<dyn DbController>,
}

impl StateStore {
    /// Open a state store over `db`.
    pub fn new(db: Arc<dyn DbController>) -> Self {
        StateStore { db }
    }

    /// Persist `state` together with the validator sets and parameters it
    /// pins for future heights: the set signing H+1, the set signing H+2,
    /// and the parameters effective at H+1.
    pub fn save(&self, state: &State) -> StoreResult<()> {
        let mut batch = DbBatch::new();
        batch.insert(keys::state_key(), Some(encode(state)?));
        let next_height = state.last_block_height + 1;
        batch.insert(
            keys::height_key(keys::PREFIX_VALIDATORS, next_height),
            Some(encode(&state.validators)?),
        );
        batch.insert(
            keys::height_key(keys::PREFIX_VALIDATORS, next_height + 1),
            Some(encode(&state.next_validators)?),
        );
        batch.insert(
            keys::height_key(keys::PREFIX_CONSENSUS_PARAMS, next_height),
            Some(encode(&state.consensus_params)?),
        );
        self.db.write_batch(batch)?;
        debug!(height = state.last_block_height, "saved consensus state");
        Ok(())
    }

    /// Load the latest state snapshot.
    pub fn load(&self) -> StoreResult<Option<State>> {
        self.db
            .get(&keys::state_key())?
            .map(|raw| decode(&raw, "state"))
            .transpose()
    }

    /// Load the validator set effective at `height`.
    pub fn load_validators(&self, height: Height) -> StoreResult<Option<ValidatorSet>> {
        self.db
            .get(&keys::height_key(keys::PREFIX_VALIDATORS, height))?
            .map(|raw| decode(&raw, "validators"))
            .transpose()
    }

    /// Load the consensus parameters effective at `height`.
    pub fn load_consensus_params(&self, height: Height) -> StoreResult<Option<ConsensusParams>> {
        self.db
            .get(&keys::height_key(keys::PREFIX_CONSENSUS_PARAMS, height))?
            .map(|raw| decode(&raw, "consensus params"))
            .transpose()
    }

    /// Persist the application-interface responses of `height`.
    pub fn save_abci_responses(
        &self,
        height: Height,
        responses: &AbciResponses,
    ) -> StoreResult<()> {
        self.db.put(
            keys::height_key(keys::PREFIX_ABCI_RESPONSES, height),
            encode(responses)?,
        )?;
        Ok(())
    }

    /// Load the application-interface responses of `height`.
    pub fn load_abci_responses(&self, height: Height) -> StoreResult<Option<AbciResponses>> {
        self.db
            .get(&keys::height_key(keys::PREFIX_ABCI_RESPONSES, height))?
            .map(|raw| decode(&raw, "abci responses"))
            .transpose()
    }

    /// Drop per-height records below `retain_height`.
    pub fn prune_states(&self, retain_height: Height) -> StoreResult<()> {
        let mut batch = DbBatch::new();
        for prefix in [
            keys::PREFIX_VALIDATORS,
            keys::PREFIX_CONSENSUS_PARAMS,
            keys::PREFIX_ABCI_RESPONSES,
        ] {
            for (key, _) in self.db.prefix_iterator(&[prefix]) {
                match keys::decode_height_key(&key) {
                    Some(height) if height < retain_height => {
                        batch.insert(key, None);
                    }
                    _ => {}
                }
            }
        }
        self.db.write_batch(batch)?;
        Ok(())
    }
}

fn encode<T: serde::Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|err| StoreError::Models(err.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(raw: &[u8], what: &str) -> StoreResult<T> {
    serde_json::from_slice(raw).map_err(|_| StoreError::Corruption(what.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use corten_db::MemDb;
    use corten_models::abci::ResponseDeliverTx;
    use corten_models::genesis::{GenesisDoc, GenesisValidator};
    use corten_signature::KeyPair;
    use corten_time::Timestamp;

    fn genesis_state() -> State {
        let genesis = GenesisDoc {
            genesis_time: Timestamp::from_millis(5),
            chain_id: "state-store-test".into(),
            initial_height: 1,
            consensus_params: None,
            validators: vec![GenesisValidator {
                address: None,
                pub_key: KeyPair::generate().get_public_key(),
                power: 10,
                name: None,
            }],
            app_state: serde_json::Value::Null,
            app_hash: None,
        };
        State::from_genesis(&genesis).unwrap()
    }

    #[test]
    fn save_load_roundtrip() {
        let store = StateStore::new(Arc::new(MemDb::new()));
        assert!(store.load().unwrap().is_none());

        let state = genesis_state();
        store.save(&state).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, state);

        // validators pinned for H+1 and H+2
        assert!(store.load_validators(1).unwrap().is_some());
        assert!(store.load_validators(2).unwrap().is_some());
        assert!(store.load_validators(3).unwrap().is_none());
        assert!(store.load_consensus_params(1).unwrap().is_some());
    }

    #[test]
    fn abci_responses_per_height() {
        let store = StateStore::new(Arc::new(MemDb::new()));
        let responses = AbciResponses {
            deliver_txs: vec![ResponseDeliverTx {
                code: 0,
                gas_wanted: 5,
                ..Default::default()
            }],
            ..Default::default()
        };
        store.save_abci_responses(7, &responses).unwrap();
        assert_eq!(store.load_abci_responses(7).unwrap().unwrap(), responses);
        assert!(store.load_abci_responses(8).unwrap().is_none());
    }

    #[test]
    fn prune_drops_old_heights() {
        let store = StateStore::new(Arc::new(MemDb::new()));
        let mut state = genesis_state();
        for height in 1..=5 {
            state.last_block_height = height;
            store.save(&state).unwrap();
            store
                .save_abci_responses(height, &AbciResponses::default())
                .unwrap();
        }
        store.prune_states(5).unwrap();
        assert!(store.load_validators(4).unwrap().is_none());
        assert!(store.load_validators(5).unwrap().is_some());
        assert!(store.load_abci_responses(4).unwrap().is_none());
        assert!(store.load_abci_responses(5).unwrap().is_some());
    }
}
