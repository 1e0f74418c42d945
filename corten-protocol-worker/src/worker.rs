//! The protocol worker task: channel dispatch between the transport and the
//! consensus / pool / block-sync components.

use crate::block_sync::BlockPool;
use crate::peer_state::PeerRoundState;
use corten_consensus_exports::{
    ConsensusChannels, ConsensusCommand, ConsensusMessage, GossipEvent, MessageInfo,
    RoundStateSummary,
};
use corten_execution_worker::BlockExecutor;
use corten_logging::corten_trace;
use corten_models::block::Tx;
use corten_models::block_id::BlockId;
use corten_models::evidence::Evidence;
use corten_models::part_set::Part;
use corten_models::state::State;
use corten_models::vote::{SignedMsgType, Vote};
use corten_network_exports::{ChannelId, NetworkCommand, NetworkEvent, PeerId};
use corten_pool_exports::EvidencePoolController;
use corten_protocol_exports::{
    BlockSyncMessage, BlockSyncMessageDeserializer, BlockSyncMessageSerializer, DataMessage,
    DataMessageDeserializer, DataMessageSerializer, EvidenceMessage,
    EvidenceMessageDeserializer, EvidenceMessageSerializer, MempoolMessage,
    MempoolMessageDeserializer, MempoolMessageSerializer, ProtocolConfig, ProtocolEvent,
    StateMessage, StateMessageDeserializer, StateMessageSerializer, VoteChannelMessage,
    VoteChannelMessageDeserializer, VoteChannelMessageSerializer, VoteSetBitsMessage,
    VoteSetBitsMessageDeserializer, VoteSetBitsMessageSerializer,
};
use corten_serialization::{DeserializeError, Deserializer, Serializer};
use corten_storage::BlockStore;
use corten_time::Timestamp;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Channels wiring the protocol worker to its collaborators.
pub struct ProtocolChannels {
    /// Commands into the network worker.
    pub network_command_tx: mpsc::Sender<NetworkCommand>,
    /// Events from the network worker.
    pub network_event_rx: mpsc::Receiver<NetworkEvent>,
    /// Channels of the consensus worker.
    pub consensus: ConsensusChannels,
    /// Transactions into the pool worker.
    pub pool_tx_sender: mpsc::Sender<Tx>,
    /// Evidence into the pool worker.
    pub pool_evidence_sender: mpsc::Sender<Evidence>,
    /// Admitted transactions to gossip, from the pool broadcast hook.
    pub tx_broadcast_rx: mpsc::Receiver<Tx>,
    /// Verified evidence to gossip, from the pool broadcast hook.
    pub evidence_broadcast_rx: mpsc::Receiver<Evidence>,
    /// Events to the node supervisor.
    pub event_tx: mpsc::Sender<ProtocolEvent>,
}

/// Handle used to stop the protocol worker.
pub struct ProtocolManager {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl ProtocolManager {
    /// Signal the worker to stop and wait for it.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(()).await;
        let _ = self.handle.await;
        info!("protocol worker stopped");
    }
}

/// Spawn the protocol worker. With `block_sync` set it starts by catching up
/// from peers and emits `SwitchToConsensus` when done.
pub fn start_protocol_worker(
    config: ProtocolConfig,
    block_sync: bool,
    state: State,
    executor: Arc<BlockExecutor>,
    block_store: BlockStore,
    evidence_pool: Arc<dyn EvidencePoolController>,
    channels: ProtocolChannels,
) -> ProtocolManager {
    let (stop_tx, stop_rx) = mpsc::channel(1);
    let start_height = state.last_block_height + 1;
    let worker = ProtocolWorker {
        peers: HashMap::new(),
        summary: None,
        proposal: None,
        proposal_parts: Vec::new(),
        votes_cache: Vec::new(),
        pool: BlockPool::new(config.clone(), start_height),
        syncing: block_sync,
        sync_started_at: Timestamp::now().unwrap_or(Timestamp::ZERO),
        sync_state: state,
        config,
        executor,
        block_store,
        evidence_pool,
        channels,
        stop_rx,
    };
    let handle = tokio::spawn(worker.run_loop());
    ProtocolManager { stop_tx, handle }
}

struct ProtocolWorker {
    config: ProtocolConfig,
    peers: HashMap<PeerId, PeerRoundState>,
    /// Our own latest round summary, re-announced to fresh peers.
    summary: Option<RoundStateSummary>,
    /// The proposal of the current round, for re-gossip.
    proposal: Option<corten_models::proposal::Proposal>,
    /// Parts of the current proposal, for re-gossip.
    proposal_parts: Vec<Part>,
    /// Votes of the current height seen through gossip events.
    votes_cache: Vec<Vote>,
    pool: BlockPool,
    syncing: bool,
    sync_started_at: Timestamp,
    /// The state block-sync extends; frozen once consensus takes over.
    sync_state: State,
    executor: Arc<BlockExecutor>,
    block_store: BlockStore,
    evidence_pool: Arc<dyn EvidencePoolController>,
    channels: ProtocolChannels,
    stop_rx: mpsc::Receiver<()>,
}

impl ProtocolWorker {
    async fn run_loop(mut self) {
        let mut status_tick =
            tokio::time::interval(self.config.status_update_interval.to_duration());
        let mut try_sync_tick =
            tokio::time::interval(self.config.try_sync_interval.to_duration());
        let mut switch_tick =
            tokio::time::interval(self.config.switch_to_consensus_interval.to_duration());
        let mut gossip_tick = tokio::time::interval(self.config.peer_gossip_sleep.to_duration());
        let mut maj23_tick =
            tokio::time::interval(self.config.peer_query_maj23_sleep.to_duration());

        loop {
            tokio::select! {
                _ = self.stop_rx.recv() => break,

                Some(event) = self.channels.network_event_rx.recv() => {
                    self.handle_network_event(event).await;
                }

                Some(event) = self.channels.consensus.gossip_rx.recv() => {
                    self.handle_gossip_event(event).await;
                }

                Some(tx) = self.channels.tx_broadcast_rx.recv() => {
                    self.broadcast_mempool(tx).await;
                }

                Some(evidence) = self.channels.evidence_broadcast_rx.recv() => {
                    self.broadcast_evidence(evidence).await;
                }

                _ = status_tick.tick() => {
                    self.broadcast_status().await;
                }

                _ = try_sync_tick.tick() => {
                    if self.syncing {
                        self.try_sync().await;
                    }
                }

                _ = switch_tick.tick() => {
                    self.maybe_switch_to_consensus().await;
                }

                _ = gossip_tick.tick() => {
                    self.gossip_round().await;
                }

                _ = maj23_tick.tick() => {
                    self.query_maj23().await;
                }
            }
        }
    }

    // ---- outbound plumbing -------------------------------------------------

    async fn send_to(&self, peer_id: PeerId, channel: ChannelId, data: Vec<u8>) {
        let _ = self
            .channels
            .network_command_tx
            .send(NetworkCommand::SendMessage {
                peer_id,
                channel,
                data,
            })
            .await;
    }

    async fn broadcast(&self, channel: ChannelId, data: Vec<u8>) {
        let _ = self
            .channels
            .network_command_tx
            .send(NetworkCommand::Broadcast { channel, data })
            .await;
    }

    async fn punish_peer(&mut self, peer_id: PeerId, reason: &str) {
        warn!(%peer_id, reason, "peer protocol violation");
        self.send_to(peer_id, ChannelId::PeerError, reason.as_bytes().to_vec())
            .await;
        let _ = self
            .channels
            .network_command_tx
            .send(NetworkCommand::Ban { peer_id })
            .await;
        self.peers.remove(&peer_id);
        self.pool.remove_peer(&peer_id);
    }

    // ---- network events ----------------------------------------------------

    async fn handle_network_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::PeerConnected { peer_id, .. } => {
                info!(%peer_id, "peer connected");
                self.peers.insert(peer_id, PeerRoundState::default());
                // catch the fresh peer up on our position and stores
                if let Some(summary) = self.summary.clone() {
                    let data = self.encode_round_step(&summary);
                    self.send_to(peer_id, ChannelId::State, data).await;
                }
                self.send_status_to(Some(peer_id)).await;
                let (pending, _) = self.evidence_pool.pending_evidence(i64::MAX);
                for evidence in pending {
                    let message = EvidenceMessage::Evidence(Box::new(evidence));
                    if let Ok(data) = EvidenceMessageSerializer::new().serialize_to_vec(&message)
                    {
                        self.send_to(peer_id, ChannelId::Evidence, data).await;
                    }
                }
            }
            NetworkEvent::PeerDisconnected { peer_id, .. } => {
                info!(%peer_id, "peer disconnected");
                self.peers.remove(&peer_id);
                self.pool.remove_peer(&peer_id);
            }
            NetworkEvent::MessageReceived {
                peer_id,
                channel,
                data,
            } => {
                if let Err(reason) = self.handle_message(peer_id, channel, &data).await {
                    self.punish_peer(peer_id, &reason).await;
                }
            }
        }
    }

    async fn handle_message(
        &mut self,
        peer_id: PeerId,
        channel: ChannelId,
        data: &[u8],
    ) -> Result<(), String> {
        corten_trace!(
            "protocol.message",
            peer = %peer_id,
            channel = %channel,
            bytes = data.len()
        );
        match channel {
            ChannelId::State => {
                let (_, message) = StateMessageDeserializer::new()
                    .deserialize::<DeserializeError>(data)
                    .map_err(|_| "malformed state message".to_string())?;
                self.handle_state_message(peer_id, message).await;
            }
            ChannelId::Data => {
                let (_, message) = DataMessageDeserializer::new()
                    .deserialize::<DeserializeError>(data)
                    .map_err(|_| "malformed data message".to_string())?;
                self.handle_data_message(peer_id, message).await;
            }
            ChannelId::Vote => {
                let (_, message) = VoteChannelMessageDeserializer::new()
                    .deserialize::<DeserializeError>(data)
                    .map_err(|_| "malformed vote message".to_string())?;
                let VoteChannelMessage::Vote(vote) = message;
                if let Some(peer) = self.peers.get_mut(&peer_id) {
                    peer.set_has_vote(
                        vote.height,
                        vote.round,
                        vote.vote_type,
                        vote.validator_index,
                        self.sync_state.validators.size().max(1),
                    );
                }
                self.forward_to_consensus(peer_id, ConsensusMessage::Vote(vote))
                    .await;
            }
            ChannelId::VoteSetBits => {
                let (_, message) = VoteSetBitsMessageDeserializer::new()
                    .deserialize::<DeserializeError>(data)
                    .map_err(|_| "malformed vote-set-bits message".to_string())?;
                let VoteSetBitsMessage::VoteSetBits {
                    height,
                    round,
                    vote_type,
                    votes,
                    ..
                } = message;
                if let Some(peer) = self.peers.get_mut(&peer_id) {
                    peer.apply_vote_set_bits(height, round, vote_type, &votes);
                }
            }
            ChannelId::BlockSync => {
                let (_, message) = BlockSyncMessageDeserializer::new()
                    .deserialize::<DeserializeError>(data)
                    .map_err(|_| "malformed block-sync message".to_string())?;
                self.handle_block_sync_message(peer_id, message).await?;
            }
            ChannelId::Evidence => {
                let (_, message) = EvidenceMessageDeserializer::new()
                    .deserialize::<DeserializeError>(data)
                    .map_err(|_| "malformed evidence message".to_string())?;
                let EvidenceMessage::Evidence(evidence) = message;
                let _ = self.channels.pool_evidence_sender.send(*evidence).await;
            }
            ChannelId::Mempool => {
                let (_, message) = MempoolMessageDeserializer::new()
                    .deserialize::<DeserializeError>(data)
                    .map_err(|_| "malformed mempool message".to_string())?;
                let MempoolMessage::Tx(tx) = message;
                let _ = self.channels.pool_tx_sender.send(tx).await;
            }
            ChannelId::PeerError => {
                warn!(
                    %peer_id,
                    "peer error: {}",
                    String::from_utf8_lossy(data)
                );
            }
        }
        Ok(())
    }

    async fn handle_state_message(&mut self, peer_id: PeerId, message: StateMessage) {
        match message {
            StateMessage::NewRoundStep {
                height,
                round,
                step,
                last_commit_round,
                ..
            } => {
                if let Some(peer) = self.peers.get_mut(&peer_id) {
                    peer.apply_round_step(height, round, step, last_commit_round);
                }
            }
            StateMessage::NewValidBlock {
                height,
                round,
                parts_header,
                parts,
                ..
            } => {
                if let Some(peer) = self.peers.get_mut(&peer_id) {
                    peer.apply_new_valid_block(height, round, parts_header, parts);
                }
            }
            StateMessage::HasVote {
                height,
                round,
                vote_type,
                index,
            } => {
                let num_validators = self.sync_state.validators.size().max(1);
                if let Some(peer) = self.peers.get_mut(&peer_id) {
                    peer.set_has_vote(height, round, vote_type, index, num_validators);
                }
            }
            StateMessage::VoteSetMaj23 {
                height,
                round,
                vote_type,
                block_id,
            } => {
                let _ = self
                    .channels
                    .consensus
                    .command_tx
                    .send(ConsensusCommand::SetPeerMaj23 {
                        peer_id: peer_id.to_string(),
                        height,
                        round,
                        vote_type,
                        block_id,
                    })
                    .await;
                // answer with the bits we hold for that block
                let (response_tx, response_rx) = oneshot::channel();
                let sent = self
                    .channels
                    .consensus
                    .command_tx
                    .send(ConsensusCommand::GetVoteSetBits {
                        height,
                        round,
                        vote_type,
                        block_id,
                        response_tx,
                    })
                    .await;
                if sent.is_ok() {
                    if let Ok(Some(bits)) = response_rx.await {
                        let message = VoteSetBitsMessage::VoteSetBits {
                            height: bits.height,
                            round: bits.round,
                            vote_type: bits.vote_type,
                            block_id: bits.block_id,
                            votes: bits.votes,
                        };
                        if let Ok(data) =
                            VoteSetBitsMessageSerializer::new().serialize_to_vec(&message)
                        {
                            self.send_to(peer_id, ChannelId::VoteSetBits, data).await;
                        }
                    }
                }
            }
        }
    }

    async fn handle_data_message(&mut self, peer_id: PeerId, message: DataMessage) {
        match message {
            DataMessage::Proposal(proposal) => {
                if let Some(peer) = self.peers.get_mut(&peer_id) {
                    peer.set_has_proposal(
                        proposal.height,
                        proposal.round,
                        proposal.block_id.part_set_header,
                    );
                }
                self.forward_to_consensus(peer_id, ConsensusMessage::Proposal(proposal))
                    .await;
            }
            DataMessage::ProposalPol {
                height,
                proposal_pol_round,
                proposal_pol,
            } => {
                if let Some(peer) = self.peers.get_mut(&peer_id) {
                    peer.apply_vote_set_bits(
                        height,
                        proposal_pol_round,
                        SignedMsgType::Prevote,
                        &proposal_pol,
                    );
                }
            }
            DataMessage::BlockPart {
                height,
                round,
                part,
            } => {
                if let Some(peer) = self.peers.get_mut(&peer_id) {
                    peer.set_has_part(height, round, part.index as usize);
                }
                self.forward_to_consensus(
                    peer_id,
                    ConsensusMessage::BlockPart {
                        height,
                        round,
                        part,
                    },
                )
                .await;
            }
        }
    }

    async fn forward_to_consensus(&self, peer_id: PeerId, msg: ConsensusMessage) {
        let _ = self
            .channels
            .consensus
            .message_tx
            .send(MessageInfo {
                msg,
                peer_id: Some(peer_id.to_string()),
            })
            .await;
    }

    // ---- consensus gossip events -------------------------------------------

    fn encode_round_step(&self, summary: &RoundStateSummary) -> Vec<u8> {
        let now = Timestamp::now().unwrap_or(Timestamp::ZERO);
        let seconds = now.saturating_sub(summary.start_time).as_millis() as i64 / 1_000;
        let message = StateMessage::NewRoundStep {
            height: summary.height,
            round: summary.round,
            step: summary.step,
            seconds_since_start_time: seconds,
            last_commit_round: summary.last_commit_round,
        };
        StateMessageSerializer::new()
            .serialize_to_vec(&message)
            .unwrap_or_default()
    }

    async fn handle_gossip_event(&mut self, event: GossipEvent) {
        match event {
            GossipEvent::Proposal(proposal) => {
                let data = DataMessageSerializer::new()
                    .serialize_to_vec(&DataMessage::Proposal(proposal.clone()))
                    .unwrap_or_default();
                self.proposal = Some(proposal);
                self.proposal_parts.clear();
                self.broadcast(ChannelId::Data, data).await;
            }
            GossipEvent::BlockPart {
                height,
                round,
                part,
            } => {
                let data = DataMessageSerializer::new()
                    .serialize_to_vec(&DataMessage::BlockPart {
                        height,
                        round,
                        part: part.clone(),
                    })
                    .unwrap_or_default();
                self.proposal_parts.push(part);
                self.broadcast(ChannelId::Data, data).await;
            }
            GossipEvent::Vote(vote) => {
                let data = VoteChannelMessageSerializer::new()
                    .serialize_to_vec(&VoteChannelMessage::Vote(vote.clone()))
                    .unwrap_or_default();
                self.votes_cache.push(vote);
                self.broadcast(ChannelId::Vote, data).await;
            }
            GossipEvent::RoundStep(summary) => {
                let height_changed = self
                    .summary
                    .as_ref()
                    .map(|previous| previous.height != summary.height)
                    .unwrap_or(true);
                let round_changed = height_changed
                    || self
                        .summary
                        .as_ref()
                        .map(|previous| previous.round != summary.round)
                        .unwrap_or(true);
                if height_changed {
                    self.votes_cache.clear();
                }
                if round_changed {
                    self.proposal = None;
                    self.proposal_parts.clear();
                }
                let data = self.encode_round_step(&summary);
                self.summary = Some(summary);
                self.broadcast(ChannelId::State, data).await;
            }
            GossipEvent::NewValidBlock {
                height,
                round,
                parts_header,
                parts,
                is_commit,
            } => {
                let data = StateMessageSerializer::new()
                    .serialize_to_vec(&StateMessage::NewValidBlock {
                        height,
                        round,
                        parts_header,
                        parts,
                        is_commit,
                    })
                    .unwrap_or_default();
                self.broadcast(ChannelId::State, data).await;
            }
            GossipEvent::HasVote {
                height,
                round,
                vote_type,
                index,
            } => {
                let data = StateMessageSerializer::new()
                    .serialize_to_vec(&StateMessage::HasVote {
                        height,
                        round,
                        vote_type,
                        index,
                    })
                    .unwrap_or_default();
                self.broadcast(ChannelId::State, data).await;
            }
        }
    }

    // ---- mempool / evidence gossip ----------------------------------------

    async fn broadcast_mempool(&self, tx: Tx) {
        if let Ok(data) = MempoolMessageSerializer::new().serialize_to_vec(&MempoolMessage::Tx(tx))
        {
            self.broadcast(ChannelId::Mempool, data).await;
        }
    }

    async fn broadcast_evidence(&self, evidence: Evidence) {
        if let Ok(data) = EvidenceMessageSerializer::new()
            .serialize_to_vec(&EvidenceMessage::Evidence(Box::new(evidence)))
        {
            self.broadcast(ChannelId::Evidence, data).await;
        }
    }

    // ---- block sync --------------------------------------------------------

    async fn send_status_to(&self, peer_id: Option<PeerId>) {
        let (base, height) = match (self.block_store.base(), self.block_store.height()) {
            (Ok(base), Ok(height)) => (base, height),
            _ => return,
        };
        let serializer = BlockSyncMessageSerializer::new();
        let request = serializer
            .serialize_to_vec(&BlockSyncMessage::StatusRequest)
            .unwrap_or_default();
        let response = serializer
            .serialize_to_vec(&BlockSyncMessage::StatusResponse { base, height })
            .unwrap_or_default();
        match peer_id {
            Some(peer_id) => {
                self.send_to(peer_id, ChannelId::BlockSync, request).await;
                self.send_to(peer_id, ChannelId::BlockSync, response).await;
            }
            None => {
                self.broadcast(ChannelId::BlockSync, request).await;
                self.broadcast(ChannelId::BlockSync, response).await;
            }
        }
    }

    async fn broadcast_status(&self) {
        self.send_status_to(None).await;
    }

    async fn handle_block_sync_message(
        &mut self,
        peer_id: PeerId,
        message: BlockSyncMessage,
    ) -> Result<(), String> {
        match message {
            BlockSyncMessage::StatusRequest => {
                let (base, height) = (
                    self.block_store.base().unwrap_or(0),
                    self.block_store.height().unwrap_or(0),
                );
                let data = BlockSyncMessageSerializer::new()
                    .serialize_to_vec(&BlockSyncMessage::StatusResponse { base, height })
                    .unwrap_or_default();
                self.send_to(peer_id, ChannelId::BlockSync, data).await;
            }
            BlockSyncMessage::StatusResponse { base, height } => {
                self.pool.set_peer_range(peer_id, base, height);
            }
            BlockSyncMessage::BlockRequest { height } => {
                let reply = match self.block_store.load_block(height) {
                    Ok(Some(block)) => BlockSyncMessage::BlockResponse {
                        block: Box::new(block),
                    },
                    _ => BlockSyncMessage::NoBlockResponse { height },
                };
                if let Ok(data) = BlockSyncMessageSerializer::new().serialize_to_vec(&reply) {
                    self.send_to(peer_id, ChannelId::BlockSync, data).await;
                }
            }
            BlockSyncMessage::BlockResponse { block } => {
                if !self.syncing {
                    debug!(%peer_id, "ignoring block response outside sync");
                    return Ok(());
                }
                self.pool.add_block(peer_id, *block)?;
            }
            BlockSyncMessage::NoBlockResponse { height } => {
                self.pool.on_no_block(peer_id, height);
            }
        }
        Ok(())
    }

    /// Apply buffered blocks in order, then keep the request pipeline full.
    async fn try_sync(&mut self) {
        while let Some((peer_id, block)) = self.pool.pop_ready() {
            let height = block.header.height;
            let parts = match block.make_part_set() {
                Ok(parts) => parts,
                Err(err) => {
                    warn!(%peer_id, height, "unusable synced block: {}", err);
                    self.pool.reject_applied(peer_id, height);
                    self.punish_peer(peer_id, "sent an unusable block").await;
                    break;
                }
            };
            let block_id = BlockId {
                hash: block.hash(),
                part_set_header: parts.header(),
            };
            let seen_commit = block.last_commit.clone();
            match self.executor.apply_block(&self.sync_state, block_id, &block) {
                Ok(new_state) => {
                    // persist the block so we can serve it and restart from
                    // it; the next block's commit seals it, until then keep
                    // the one we have
                    if let Err(err) = self.block_store.save_block(&block, &parts, &seen_commit) {
                        warn!(height, "failed to store synced block: {}", err);
                    }
                    corten_trace!("protocol.synced_block", height = height);
                    self.sync_state = new_state;
                }
                Err(err) => {
                    warn!(%peer_id, height, "synced block failed to apply: {}", err);
                    self.pool.reject_applied(peer_id, height);
                    self.punish_peer(peer_id, "sent an invalid block").await;
                    break;
                }
            }
        }

        let now = Timestamp::now().unwrap_or(Timestamp::ZERO);
        self.pool.expire_requests(now);
        let requests = self.pool.schedule(now);
        for (peer_id, height) in requests {
            if let Ok(data) = BlockSyncMessageSerializer::new()
                .serialize_to_vec(&BlockSyncMessage::BlockRequest { height })
            {
                self.send_to(peer_id, ChannelId::BlockSync, data).await;
            }
        }
    }

    async fn maybe_switch_to_consensus(&mut self) {
        if !self.syncing {
            return;
        }
        let now = Timestamp::now().unwrap_or(Timestamp::ZERO);
        let ran_long_enough = now.saturating_sub(self.sync_started_at)
            >= self.config.switch_to_consensus_interval;
        if ran_long_enough && self.pool.caught_up() {
            info!(
                height = self.sync_state.last_block_height,
                "caught up, switching to consensus"
            );
            self.syncing = false;
            let _ = self
                .channels
                .event_tx
                .send(ProtocolEvent::SwitchToConsensus {
                    state: Box::new(self.sync_state.clone()),
                })
                .await;
        }
    }

    // ---- re-gossip ---------------------------------------------------------

    /// One lazy catch-up pass: for every peer at our height, send one part
    /// and one vote it lacks.
    async fn gossip_round(&mut self) {
        let summary = match &self.summary {
            Some(summary) => summary.clone(),
            None => return,
        };
        let mut part_sends: Vec<(PeerId, Part)> = Vec::new();
        let mut vote_sends: Vec<(PeerId, Vote)> = Vec::new();
        let mut proposal_sends: Vec<PeerId> = Vec::new();

        for (peer_id, peer) in &self.peers {
            if peer.height != summary.height {
                continue;
            }
            if self.proposal.is_some() && peer.round == summary.round && !peer.has_proposal {
                proposal_sends.push(*peer_id);
            }
            if peer.round == summary.round {
                if let Some(part) = self
                    .proposal_parts
                    .iter()
                    .find(|part| !peer.has_part(part.index as usize))
                {
                    part_sends.push((*peer_id, part.clone()));
                }
            }
            if let Some(vote) = self
                .votes_cache
                .iter()
                .find(|vote| !peer.has_vote(vote.round, vote.vote_type, vote.validator_index))
            {
                vote_sends.push((*peer_id, vote.clone()));
            }
        }

        for peer_id in proposal_sends {
            if let Some(proposal) = self.proposal.clone() {
                if let Ok(data) =
                    DataMessageSerializer::new().serialize_to_vec(&DataMessage::Proposal(proposal))
                {
                    self.send_to(peer_id, ChannelId::Data, data).await;
                }
            }
        }
        for (peer_id, part) in part_sends {
            if let Ok(data) = DataMessageSerializer::new().serialize_to_vec(&DataMessage::BlockPart {
                height: summary.height,
                round: summary.round,
                part,
            }) {
                self.send_to(peer_id, ChannelId::Data, data).await;
            }
        }
        for (peer_id, vote) in vote_sends {
            if let Ok(data) = VoteChannelMessageSerializer::new()
                .serialize_to_vec(&VoteChannelMessage::Vote(vote))
            {
                self.send_to(peer_id, ChannelId::Vote, data).await;
            }
        }
    }

    /// Tell peers about the majorities we hold so they can respond with the
    /// votes we miss.
    async fn query_maj23(&mut self) {
        if self.peers.is_empty() {
            return;
        }
        let (response_tx, response_rx) = oneshot::channel();
        if self
            .channels
            .consensus
            .command_tx
            .send(ConsensusCommand::GetRoundState { response_tx })
            .await
            .is_err()
        {
            return;
        }
        let summary = match response_rx.await {
            Ok(summary) => summary,
            Err(_) => return,
        };
        let claims: Vec<(SignedMsgType, BlockId)> = [
            (SignedMsgType::Prevote, summary.prevote_maj23),
            (SignedMsgType::Precommit, summary.precommit_maj23),
        ]
        .into_iter()
        .filter_map(|(vote_type, block_id)| block_id.map(|id| (vote_type, id)))
        .collect();
        for (vote_type, block_id) in claims {
            let message = StateMessage::VoteSetMaj23 {
                height: summary.height,
                round: summary.round,
                vote_type,
                block_id,
            };
            if let Ok(data) = StateMessageSerializer::new().serialize_to_vec(&message) {
                self.broadcast(ChannelId::State, data).await;
            }
        }
        self.summary = Some(summary);
    }
}
