//! Fixtures wiring a protocol worker to in-memory channel stubs.

use corten_consensus_exports::{ConsensusChannels, ConsensusCommand, GossipEvent, MessageInfo};
use corten_db::MemDb;
use corten_execution_exports::{Application, EventBus};
use corten_execution_worker::BlockExecutor;
use corten_models::abci::{
    CheckTxKind, RequestBeginBlock, RequestInfo, RequestInitChain, ResponseBeginBlock,
    ResponseCheckTx, ResponseCommit, ResponseDeliverTx, ResponseEndBlock, ResponseInfo,
    ResponseInitChain,
};
use corten_models::block::Tx;
use corten_models::evidence::{Evidence, EvidenceList};
use corten_models::genesis::{GenesisDoc, GenesisValidator};
use corten_models::state::State;
use corten_models::vote::Vote;
use corten_models::Height;
use corten_network_exports::{NetworkCommand, NetworkEvent, PeerId};
use corten_pool_exports::{EvidencePoolController, PoolChannels, PoolConfig, PoolResult};
use corten_pool_worker::TxPool;
use corten_protocol_exports::{ProtocolConfig, ProtocolEvent};
use corten_signature::KeyPair;
use corten_storage::{BlockStore, StateStore};
use corten_time::Timestamp;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::worker::{start_protocol_worker, ProtocolChannels, ProtocolManager};

pub struct NullApp;

impl Application for NullApp {
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
        ResponseDeliverTx::default()
    }
    fn end_block(&self, _height: Height) -> ResponseEndBlock {
        ResponseEndBlock::default()
    }
    fn commit(&self) -> ResponseCommit {
        ResponseCommit::default()
    }
    fn check_tx(&self, _tx: &Tx, _kind: CheckTxKind) -> ResponseCheckTx {
        ResponseCheckTx::default()
    }
}

#[derive(Default)]
pub struct NullEvidencePool;

impl EvidencePoolController for NullEvidencePool {
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
    fn report_conflicting_votes(&self, _vote_a: Vote, _vote_b: Vote) {}
    fn size(&self) -> usize {
        0
    }
}

/// Counterparts of every channel the protocol worker is wired to.
pub struct Harness {
    pub manager: ProtocolManager,
    pub network_command_rx: mpsc::Receiver<NetworkCommand>,
    pub network_event_tx: mpsc::Sender<NetworkEvent>,
    pub consensus_message_rx: mpsc::Receiver<MessageInfo>,
    pub consensus_command_rx: mpsc::Receiver<ConsensusCommand>,
    pub gossip_tx: mpsc::Sender<GossipEvent>,
    pub pool_tx_rx: mpsc::Receiver<Tx>,
    pub pool_evidence_rx: mpsc::Receiver<Evidence>,
    pub tx_broadcast_tx: mpsc::Sender<Tx>,
    pub evidence_broadcast_tx: mpsc::Sender<Evidence>,
    pub protocol_event_rx: mpsc::Receiver<ProtocolEvent>,
    pub state: State,
}

pub fn peer() -> PeerId {
    PeerId::new(KeyPair::generate().get_public_key())
}

/// Start a protocol worker against channel stubs and an in-memory chain.
pub fn harness(block_sync: bool) -> Harness {
    let genesis = GenesisDoc {
        genesis_time: Timestamp::from_millis(1_000),
        chain_id: "protocol-test".into(),
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
    let state = State::from_genesis(&genesis).unwrap();

    let db: Arc<MemDb> = Arc::new(MemDb::new());
    let state_store = StateStore::new(db.clone());
    let block_store = BlockStore::new(db);
    state_store.save(&state).unwrap();

    let app: Arc<NullApp> = Arc::new(NullApp);
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
    let evidence_pool: Arc<NullEvidencePool> = Arc::new(NullEvidencePool);
    let executor = Arc::new(BlockExecutor::new(
        state_store,
        block_store.clone(),
        app,
        tx_pool,
        evidence_pool.clone(),
        EventBus::default(),
    ));

    let (network_command_tx, network_command_rx) = mpsc::channel(1024);
    let (network_event_tx, network_event_rx) = mpsc::channel(1024);
    let (consensus_message_tx, consensus_message_rx) = mpsc::channel(1024);
    let (consensus_command_tx, consensus_command_rx) = mpsc::channel(64);
    let (gossip_tx, gossip_rx) = mpsc::channel(1024);
    let (pool_tx_sender, pool_tx_rx) = mpsc::channel(1024);
    let (pool_evidence_sender, pool_evidence_rx) = mpsc::channel(1024);
    let (tx_broadcast_tx, tx_broadcast_rx) = mpsc::channel(1024);
    let (evidence_broadcast_tx, evidence_broadcast_rx) = mpsc::channel(1024);
    let (event_tx, protocol_event_rx) = mpsc::channel(64);

    // quiet periodic timers so tests only see traffic they cause; the
    // immediate first status tick still fires once
    let config = ProtocolConfig {
        status_update_interval: Timestamp::from_millis(3_600_000),
        peer_gossip_sleep: Timestamp::from_millis(3_600_000),
        peer_query_maj23_sleep: Timestamp::from_millis(3_600_000),
        switch_to_consensus_interval: Timestamp::from_millis(100),
        try_sync_interval: Timestamp::from_millis(10),
        ..Default::default()
    };

    let manager = start_protocol_worker(
        config,
        block_sync,
        state.clone(),
        executor,
        block_store,
        evidence_pool,
        ProtocolChannels {
            network_command_tx,
            network_event_rx,
            consensus: ConsensusChannels {
                message_tx: consensus_message_tx,
                command_tx: consensus_command_tx,
                gossip_rx,
            },
            pool_tx_sender,
            pool_evidence_sender,
            tx_broadcast_rx,
            evidence_broadcast_rx,
            event_tx,
        },
    );

    Harness {
        manager,
        network_command_rx,
        network_event_tx,
        consensus_message_rx,
        consensus_command_rx,
        gossip_tx,
        pool_tx_rx,
        pool_evidence_rx,
        tx_broadcast_tx,
        evidence_broadcast_tx,
        protocol_event_rx,
        state,
    }
}
