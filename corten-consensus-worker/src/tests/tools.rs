//! Fixtures for driving the consensus worker in-process.

use corten_consensus_exports::ConsensusConfig;
use corten_db::MemDb;
use corten_execution_exports::{Application, EventBus};
use corten_execution_worker::BlockExecutor;
use corten_models::abci::{
    CheckTxKind, RequestBeginBlock, RequestInfo, RequestInitChain, ResponseBeginBlock,
    ResponseCheckTx, ResponseCommit, ResponseDeliverTx, ResponseEndBlock, ResponseInfo,
    ResponseInitChain,
};
use corten_models::address::Address;
use corten_models::block::Tx;
use corten_models::evidence::{Evidence, EvidenceList};
use corten_models::genesis::{GenesisDoc, GenesisValidator};
use corten_models::state::State;
use corten_models::vote::Vote;
use corten_models::Height;
use corten_pool_exports::{EvidencePoolController, PoolChannels, PoolConfig, PoolResult};
use corten_pool_worker::TxPool;
use corten_signature::KeyPair;
use corten_storage::{BlockStore, StateStore};
use corten_time::Timestamp;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

pub const CHAIN_ID: &str = "consensus-test";

/// Evidence pool stub that records conflicting-vote reports and stays empty.
#[derive(Default)]
pub struct RecordingEvidencePool {
    pub reported: Mutex<Vec<(Vote, Vote)>>,
}

impl EvidencePoolController for RecordingEvidencePool {
    fn pending_evidence(&self, _max_bytes: i64) -> (Vec<Evidence>, i64) {
        (Vec::new(), 0)
    }

    fn add_evidence(&self, _evidence: Evidence) -> PoolResult<()> {
        Ok(())
    }

    fn check_evidence(&self, _list: &EvidenceList) -> PoolResult<()> {
        Ok(())
    }

    fn update(&self, _state: &State, _committed: &EvidenceList) -> PoolResult<()> {
        Ok(())
    }

    fn report_conflicting_votes(&self, vote_a: Vote, vote_b: Vote) {
        self.reported.lock().push((vote_a, vote_b));
    }

    fn size(&self) -> usize {
        0
    }
}

/// Counting application, the replicated state is the delivered-tx count.
#[derive(Default)]
pub struct StubApp {
    pub delivered: AtomicI64,
}

impl Application for StubApp {
    fn info(&self, _request: RequestInfo) -> ResponseInfo {
        ResponseInfo::default()
    }
    fn init_chain(&self, _request: RequestInitChain) -> ResponseInitChain {
        ResponseInitChain::default()
    }
    fn begin_block(&self, _request: RequestBeginBlock) -> ResponseBeginBlock {
        ResponseBeginBlock::default()
    }
    fn deliver_tx(&self, _tx: &Tx) -> ResponseDeliverTx {
        self.delivered.fetch_add(1, Ordering::SeqCst);
        ResponseDeliverTx::default()
    }
    fn end_block(&self, _height: Height) -> ResponseEndBlock {
        ResponseEndBlock::default()
    }
    fn commit(&self) -> ResponseCommit {
        ResponseCommit {
            data: self.delivered.load(Ordering::SeqCst).to_le_bytes().to_vec(),
            retain_height: 0,
        }
    }
    fn check_tx(&self, tx: &Tx, _kind: CheckTxKind) -> ResponseCheckTx {
        let bytes = tx.as_bytes();
        ResponseCheckTx {
            sender: format!("sender-{}", bytes.first().copied().unwrap_or(0)),
            nonce: bytes.get(1).copied().unwrap_or(0) as u64,
            ..Default::default()
        }
    }
}

pub struct Fixture {
    pub keypairs: Vec<KeyPair>,
    pub our_keypair: KeyPair,
    pub state: State,
    pub config: ConsensusConfig,
    pub executor: Arc<BlockExecutor>,
    pub block_store: BlockStore,
    pub state_store: StateStore,
    pub evidence_pool: Arc<RecordingEvidencePool>,
    pub event_bus: EventBus,
    pub wal_dir: TempDir,
}

/// Build a fixture with `count` validators. The node's own key is the one
/// whose address sorts first, so it proposes round 0 of height 1.
pub fn fixture(count: usize) -> Fixture {
    let mut keypairs: Vec<KeyPair> = (0..count).map(|_| KeyPair::generate()).collect();
    keypairs.sort_by_key(|kp| Address::from_public_key(&kp.get_public_key()));
    let our_keypair = keypairs[0].clone();

    let genesis = GenesisDoc {
        genesis_time: Timestamp::from_millis(1_000),
        chain_id: CHAIN_ID.into(),
        initial_height: 1,
        consensus_params: None,
        validators: keypairs
            .iter()
            .map(|kp| GenesisValidator {
                address: None,
                pub_key: kp.get_public_key(),
                power: 10,
                name: None,
            })
            .collect(),
        app_state: serde_json::Value::Null,
        app_hash: None,
    };
    let state = State::from_genesis(&genesis).unwrap();

    let db: Arc<MemDb> = Arc::new(MemDb::new());
    let state_store = StateStore::new(db.clone());
    let block_store = BlockStore::new(db);
    state_store.save(&state).unwrap();

    let app: Arc<StubApp> = Arc::new(StubApp::default());
    let tx_pool = Arc::new(TxPool::new(
        PoolConfig {
            broadcast: false,
            recheck: false,
            ..Default::default()
        },
        app.clone(),
        PoolChannels::default(),
        1,
    ));
    let evidence_pool: Arc<RecordingEvidencePool> = Arc::new(RecordingEvidencePool::default());
    let event_bus = EventBus::default();
    let executor = Arc::new(BlockExecutor::new(
        state_store.clone(),
        block_store.clone(),
        app,
        tx_pool,
        evidence_pool.clone(),
        event_bus.clone(),
    ));

    let wal_dir = tempfile::tempdir().unwrap();
    let config = ConsensusConfig {
        timeout_commit: Timestamp::from_millis(100),
        wal_path: wal_dir.path().to_path_buf(),
        ..Default::default()
    };

    Fixture {
        keypairs,
        our_keypair,
        state,
        config,
        executor,
        block_store,
        state_store,
        evidence_pool,
        event_bus,
        wal_dir,
    }
}

/// The proposer of height 1 round 0 under a fresh genesis set.
pub fn first_proposer(state: &State) -> Address {
    let mut validators = state.validators.clone();
    validators.get_proposer().unwrap().address
}
