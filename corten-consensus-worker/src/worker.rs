//! The consensus worker task.
//!
//! One task owns the whole height/round pipeline. Input arrives through a
//! mailbox of peer messages, loop-backed internal messages, commands, and a
//! single timeout slot; every input is logged to the write-ahead log before
//! it takes effect. Handlers are plain functions over the round state, so a
//! crash replays to exactly the same point.

use crate::height_vote_set::HeightVoteSet;
use crate::round_state::RoundState;
use crate::wal::{TimedWalMessage, TimeoutInfo, Wal, WalMessage};
use corten_consensus_exports::{
    ConsensusChannels, ConsensusCommand, ConsensusConfig, ConsensusError, ConsensusMessage,
    ConsensusResult, GossipEvent, MessageInfo, RoundStep, VoteSetBits,
};
use corten_execution_exports::{ConsensusEvent, EventBus};
use corten_execution_worker::BlockExecutor;
use corten_hash::Hash;
use corten_logging::corten_trace;
use corten_models::block_id::BlockId;
use corten_models::part_set::{Part, PartSet};
use corten_models::proposal::Proposal;
use corten_models::state::State;
use corten_models::validator::ValidatorSet;
use corten_models::vote::{SignedMsgType, Vote};
use corten_models::vote_set::{VoteSet, VoteSetError};
use corten_models::{address::Address, Height, Round};
use corten_pool_exports::EvidencePoolController;
use corten_signature::{KeyPair, Signature, SIGNATURE_SIZE_BYTES};
use corten_storage::BlockStore;
use corten_time::Timestamp;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Handle used to stop the consensus worker.
pub struct ConsensusManager {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl ConsensusManager {
    /// Signal the worker to stop and wait for it to flush its log.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(()).await;
        let _ = self.handle.await;
        info!("consensus worker stopped");
    }
}

/// Spawn the consensus worker, replaying the write-ahead log first.
pub fn start_consensus_worker(
    config: ConsensusConfig,
    state: State,
    priv_validator: Option<KeyPair>,
    executor: Arc<BlockExecutor>,
    block_store: BlockStore,
    evidence_pool: Arc<dyn EvidencePoolController>,
    event_bus: EventBus,
) -> ConsensusResult<(ConsensusChannels, ConsensusManager)> {
    let (message_tx, message_rx) = mpsc::channel(1024);
    let (command_tx, command_rx) = mpsc::channel(64);
    let (gossip_tx, gossip_rx) = mpsc::channel(1024);
    let (stop_tx, stop_rx) = mpsc::channel(1);

    let mut worker = ConsensusWorker::new(
        config,
        state,
        priv_validator,
        executor,
        block_store,
        evidence_pool,
        event_bus,
        message_rx,
        command_rx,
        gossip_tx,
        stop_rx,
    )?;
    let handle = tokio::spawn(async move {
        if let Err(err) = worker.run_loop().await {
            error!("consensus worker failed: {}", err);
        }
    });
    Ok((
        ConsensusChannels {
            message_tx,
            command_tx,
            gossip_rx,
        },
        ConsensusManager { stop_tx, handle },
    ))
}

/// The consensus state machine.
pub struct ConsensusWorker {
    config: ConsensusConfig,
    state: State,
    rs: RoundState,
    priv_validator: Option<KeyPair>,
    priv_validator_address: Option<Address>,
    executor: Arc<BlockExecutor>,
    block_store: BlockStore,
    evidence_pool: Arc<dyn EvidencePoolController>,
    event_bus: EventBus,
    wal: Wal,
    replay_mode: bool,

    message_rx: mpsc::Receiver<MessageInfo>,
    command_rx: mpsc::Receiver<ConsensusCommand>,
    gossip_tx: mpsc::Sender<GossipEvent>,
    stop_rx: mpsc::Receiver<()>,
    timeout_slot: Option<(Instant, TimeoutInfo)>,
}

impl ConsensusWorker {
    /// Build the worker at the height following the committed state.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ConsensusConfig,
        state: State,
        priv_validator: Option<KeyPair>,
        executor: Arc<BlockExecutor>,
        block_store: BlockStore,
        evidence_pool: Arc<dyn EvidencePoolController>,
        event_bus: EventBus,
        message_rx: mpsc::Receiver<MessageInfo>,
        command_rx: mpsc::Receiver<ConsensusCommand>,
        gossip_tx: mpsc::Sender<GossipEvent>,
        stop_rx: mpsc::Receiver<()>,
    ) -> ConsensusResult<Self> {
        let wal = Wal::open(&config.wal_path.join("wal"))?;
        let height = state.last_block_height + 1;
        let priv_validator_address = priv_validator
            .as_ref()
            .map(|keypair| Address::from_public_key(&keypair.get_public_key()));
        let rs = RoundState {
            height,
            round: 0,
            step: RoundStep::NewHeight,
            start_time: Timestamp::now()?,
            commit_time: Timestamp::ZERO,
            validators: state.validators.clone(),
            proposal: None,
            proposal_block: None,
            proposal_block_parts: None,
            locked_round: -1,
            locked_block: None,
            locked_block_parts: None,
            valid_round: -1,
            valid_block: None,
            valid_block_parts: None,
            votes: HeightVoteSet::new(&state.chain_id, height, Arc::new(state.validators.clone())),
            commit_round: -1,
            last_commit: None,
            triggered_timeout_precommit: false,
        };
        let mut worker = ConsensusWorker {
            config,
            state,
            rs,
            priv_validator,
            priv_validator_address,
            executor,
            block_store,
            evidence_pool,
            event_bus,
            wal,
            replay_mode: false,
            message_rx,
            command_rx,
            gossip_tx,
            stop_rx,
            timeout_slot: None,
        };
        worker.reconstruct_last_commit()?;
        Ok(worker)
    }

    /// Rebuild the precommit set of the previous height from the stored seen
    /// commit, so commits can be gossiped and blocks proposed after restart.
    fn reconstruct_last_commit(&mut self) -> ConsensusResult<()> {
        if self.state.last_block_height == 0 {
            return Ok(());
        }
        let seen_commit = self
            .block_store
            .load_seen_commit()?
            .filter(|commit| commit.height == self.state.last_block_height)
            .or(self
                .block_store
                .load_block_commit(self.state.last_block_height)?)
            .ok_or_else(|| {
                ConsensusError::InvariantViolation(format!(
                    "no commit found for height {}",
                    self.state.last_block_height
                ))
            })?;
        let mut votes = VoteSet::new(
            &self.state.chain_id,
            seen_commit.height,
            seen_commit.round,
            SignedMsgType::Precommit,
            Arc::new(self.state.last_validators.clone()),
        );
        for index in 0..seen_commit.size() {
            if seen_commit.signatures[index].is_absent() {
                continue;
            }
            let vote = seen_commit.get_vote(index).ok_or_else(|| {
                ConsensusError::InvariantViolation("commit slot out of range".into())
            })?;
            votes.add_vote(&vote)?;
        }
        if votes.two_thirds_majority().is_none() {
            return Err(ConsensusError::InvariantViolation(
                "stored seen commit has no +2/3 majority".into(),
            ));
        }
        self.rs.last_commit = Some(votes);
        Ok(())
    }

    /// Main loop. Replays the log, schedules the first round, and then
    /// serves the mailbox until stopped.
    pub async fn run_loop(&mut self) -> ConsensusResult<()> {
        self.catchup_replay()?;
        if self.timeout_slot.is_none() {
            // replay never arms timers; re-arm for wherever replay landed
            match self.rs.step {
                RoundStep::NewHeight => self.schedule_round_0(),
                RoundStep::NewRound | RoundStep::Propose => self.schedule_timeout(
                    self.config.propose_timeout(self.rs.round),
                    self.rs.height,
                    self.rs.round,
                    RoundStep::Propose,
                ),
                RoundStep::Prevote | RoundStep::PrevoteWait => self.schedule_timeout(
                    self.config.prevote_timeout(self.rs.round),
                    self.rs.height,
                    self.rs.round,
                    RoundStep::PrevoteWait,
                ),
                RoundStep::Precommit | RoundStep::PrecommitWait => self.schedule_timeout(
                    self.config.precommit_timeout(self.rs.round),
                    self.rs.height,
                    self.rs.round,
                    RoundStep::PrecommitWait,
                ),
                RoundStep::Commit => {}
            }
        }
        loop {
            let deadline = self.timeout_slot.as_ref().map(|(deadline, _)| *deadline);
            tokio::select! {
                _ = self.stop_rx.recv() => {
                    self.wal.flush_and_sync()?;
                    return Ok(());
                }
                Some(command) = self.command_rx.recv() => {
                    self.process_command(command);
                }
                Some(message) = self.message_rx.recv() => {
                    let timed = TimedWalMessage {
                        time: Timestamp::now()?,
                        msg: WalMessage::Message(message.clone()),
                    };
                    self.wal.write(&timed)?;
                    if let Err(err) = self.handle_msg(message) {
                        debug!("message dropped: {}", err);
                    }
                }
                _ = tokio::time::sleep_until(
                    deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3_600))
                ), if deadline.is_some() => {
                    if let Some((_, timeout)) = self.timeout_slot.take() {
                        let timed = TimedWalMessage {
                            time: Timestamp::now()?,
                            msg: WalMessage::Timeout(timeout.clone()),
                        };
                        self.wal.write(&timed)?;
                        self.handle_timeout(timeout)?;
                    }
                }
            }
        }
    }

    /// Replay the log entries recorded after the last committed height.
    fn catchup_replay(&mut self) -> ConsensusResult<()> {
        let entries = match self
            .wal
            .messages_after_end_height(self.state.last_block_height)?
        {
            Some(entries) => entries,
            None => {
                if self.state.last_block_height > 0 {
                    debug!("write-ahead log does not cover the stored height, skipping replay");
                }
                return Ok(());
            }
        };
        if entries.is_empty() {
            return Ok(());
        }
        info!(count = entries.len(), "replaying consensus log");
        self.replay_mode = true;
        for entry in entries {
            let result = match entry.msg {
                WalMessage::Message(message) => self.handle_msg(message).map_err(Some),
                WalMessage::Timeout(timeout) => {
                    self.timeout_slot = None;
                    self.handle_timeout(timeout).map_err(Some)
                }
                // entries that would regress the height are ignored
                WalMessage::EndHeight(_) => Err(None),
            };
            if let Err(Some(err)) = result {
                debug!("replayed entry dropped: {}", err);
            }
        }
        self.replay_mode = false;
        Ok(())
    }

    fn process_command(&mut self, command: ConsensusCommand) {
        match command {
            ConsensusCommand::GetRoundState { response_tx } => {
                let _ = response_tx.send(self.rs.summary());
            }
            ConsensusCommand::GetState { response_tx } => {
                let _ = response_tx.send(self.state.clone());
            }
            ConsensusCommand::GetVoteSetBits {
                height,
                round,
                vote_type,
                block_id,
                response_tx,
            } => {
                let bits = if height == self.rs.height {
                    self.rs
                        .votes
                        .vote_bits(round, vote_type, &block_id)
                        .map(|votes| VoteSetBits {
                            height,
                            round,
                            vote_type,
                            block_id,
                            votes,
                        })
                } else {
                    None
                };
                let _ = response_tx.send(bits);
            }
            ConsensusCommand::SetPeerMaj23 {
                peer_id,
                height,
                round,
                vote_type,
                block_id,
            } => {
                if height == self.rs.height {
                    if let Err(err) =
                        self.rs
                            .votes
                            .set_peer_maj23(round, vote_type, &peer_id, block_id)
                    {
                        warn!(peer_id, "conflicting +2/3 claim: {}", err);
                    }
                }
            }
            ConsensusCommand::GetProposalPol {
                height,
                round,
                response_tx,
            } => {
                let bits = if height == self.rs.height {
                    self.rs.votes.prevotes(round).map(|set| set.bit_array())
                } else {
                    None
                };
                let _ = response_tx.send(bits);
            }
        }
    }

    fn handle_msg(&mut self, message: MessageInfo) -> ConsensusResult<()> {
        let peer_id = message.peer_id.clone();
        match message.msg {
            ConsensusMessage::Proposal(proposal) => self.set_proposal(proposal),
            ConsensusMessage::BlockPart {
                height,
                round,
                part,
            } => self.add_proposal_block_part(height, round, part),
            ConsensusMessage::Vote(vote) => self.try_add_vote(vote, peer_id.as_deref()),
        }
    }

    fn handle_timeout(&mut self, timeout: TimeoutInfo) -> ConsensusResult<()> {
        corten_trace!(
            "consensus.handle_timeout",
            height = timeout.height,
            round = timeout.round,
            step = %timeout.step
        );
        if timeout.height != self.rs.height
            || timeout.round < self.rs.round
            || (timeout.round == self.rs.round && timeout.step < self.rs.step)
        {
            debug!(
                height = timeout.height,
                round = timeout.round,
                "ignoring stale timeout"
            );
            return Ok(());
        }
        match timeout.step {
            RoundStep::NewHeight => self.enter_new_round(timeout.height, 0),
            RoundStep::NewRound => self.enter_propose(timeout.height, 0),
            RoundStep::Propose => self.enter_prevote(timeout.height, timeout.round),
            RoundStep::PrevoteWait => self.enter_precommit(timeout.height, timeout.round),
            RoundStep::PrecommitWait => {
                self.enter_precommit(timeout.height, timeout.round)?;
                self.enter_new_round(timeout.height, timeout.round + 1)
            }
            _ => Ok(()),
        }
    }

    // ---- round transitions -------------------------------------------------

    fn enter_new_round(&mut self, height: Height, round: Round) -> ConsensusResult<()> {
        if height != self.rs.height
            || round < self.rs.round
            || (self.rs.round == round && self.rs.step != RoundStep::NewHeight)
        {
            return Ok(());
        }
        info!(height, round, "entering new round");

        if self.rs.round < round {
            // skipped rounds rotate the proposer accordingly
            let mut validators = self.rs.validators.clone();
            validators
                .increment_proposer_priority((round - self.rs.round) as u32)
                .map_err(|err| ConsensusError::InvariantViolation(err.to_string()))?;
            self.rs.validators = validators;
        }
        self.rs.round = round;
        self.rs.step = RoundStep::NewRound;
        if round != 0 {
            self.rs.start_time = Timestamp::now()?;
            // the proposal of an earlier round is void
            self.rs.proposal = None;
            self.rs.proposal_block = None;
            self.rs.proposal_block_parts = None;
        }
        self.rs.votes.set_round(round + 1);
        self.rs.triggered_timeout_precommit = false;

        self.event_bus
            .publish(ConsensusEvent::NewRound { height, round });
        self.broadcast_step();
        self.enter_propose(height, round)
    }

    fn enter_propose(&mut self, height: Height, round: Round) -> ConsensusResult<()> {
        if height != self.rs.height
            || round < self.rs.round
            || (self.rs.round == round && self.rs.step >= RoundStep::Propose)
        {
            return Ok(());
        }
        debug!(height, round, "entering propose step");
        self.rs.step = RoundStep::Propose;
        self.broadcast_step();

        self.schedule_timeout(
            self.config.propose_timeout(round),
            height,
            round,
            RoundStep::Propose,
        );

        if self.is_our_turn_to_propose() {
            self.decide_proposal(height, round)?;
        }
        if self.rs.is_proposal_complete() {
            return self.enter_prevote(height, round);
        }
        Ok(())
    }

    fn is_our_turn_to_propose(&mut self) -> bool {
        let our_address = match self.priv_validator_address {
            Some(address) => address,
            None => return false,
        };
        match self.rs.validators.get_proposer() {
            Some(proposer) => proposer.address == our_address,
            None => false,
        }
    }

    fn decide_proposal(&mut self, height: Height, round: Round) -> ConsensusResult<()> {
        if self.replay_mode {
            return Ok(());
        }
        let (block, parts) = if let Some(block) = self.rs.locked_block.clone() {
            let parts = self.rs.locked_block_parts.clone().ok_or_else(|| {
                ConsensusError::InvariantViolation("locked block without parts".into())
            })?;
            (block, parts)
        } else if let Some(block) = self.rs.valid_block.clone() {
            let parts = self.rs.valid_block_parts.clone().ok_or_else(|| {
                ConsensusError::InvariantViolation("valid block without parts".into())
            })?;
            (block, parts)
        } else {
            let last_commit = if height == self.state.initial_height {
                corten_models::vote::Commit::empty()
            } else {
                self.rs
                    .last_commit
                    .as_ref()
                    .ok_or_else(|| {
                        ConsensusError::InvariantViolation(
                            "proposing without a last commit".into(),
                        )
                    })?
                    .make_commit()?
            };
            let proposer = self
                .priv_validator_address
                .ok_or(ConsensusError::NoPrivValidator)?;
            self.executor
                .create_proposal_block(height, &self.state, last_commit, proposer)?
        };

        let pol_round = if self.rs.locked_block.is_some() {
            self.rs.locked_round
        } else if self.rs.valid_block.is_some() {
            self.rs.valid_round
        } else {
            -1
        };
        let block_id = BlockId {
            hash: block.hash(),
            part_set_header: parts.header(),
        };
        let mut proposal = Proposal {
            height,
            round,
            pol_round,
            block_id,
            timestamp: Timestamp::now()?,
            signature: Signature::from_bytes(&[0u8; SIGNATURE_SIZE_BYTES]),
        };
        let keypair = self
            .priv_validator
            .as_ref()
            .ok_or(ConsensusError::NoPrivValidator)?;
        proposal.sign(&self.state.chain_id, keypair);
        info!(height, round, %block_id, "signed proposal");

        self.send_internal(ConsensusMessage::Proposal(proposal.clone()))?;
        self.emit_gossip(GossipEvent::Proposal(proposal));
        for index in 0..parts.total() {
            let part = parts
                .get_part(index as usize)
                .ok_or_else(|| {
                    ConsensusError::InvariantViolation("own part set incomplete".into())
                })?
                .clone();
            self.send_internal(ConsensusMessage::BlockPart {
                height,
                round,
                part: part.clone(),
            })?;
            self.emit_gossip(GossipEvent::BlockPart {
                height,
                round,
                part,
            });
        }
        Ok(())
    }

    fn enter_prevote(&mut self, height: Height, round: Round) -> ConsensusResult<()> {
        if height != self.rs.height
            || round < self.rs.round
            || (self.rs.round == round && self.rs.step >= RoundStep::Prevote)
        {
            return Ok(());
        }
        debug!(height, round, "entering prevote step");
        self.rs.step = RoundStep::Prevote;
        self.broadcast_step();
        self.do_prevote(height, round)
    }

    fn do_prevote(&mut self, height: Height, round: Round) -> ConsensusResult<()> {
        if let Some(locked) = self.rs.locked_block.clone() {
            // the lock is only surrendered for a proposal carrying a newer
            // +2/3 proof of lock for its own block
            let proposal_unlocks = self
                .rs
                .proposal
                .as_ref()
                .map(|proposal| {
                    proposal.pol_round >= self.rs.locked_round
                        && self
                            .rs
                            .votes
                            .prevotes(proposal.pol_round)
                            .and_then(|set| set.two_thirds_majority())
                            .map(|block_id| Some(block_id.hash) == self.proposal_block_hash())
                            .unwrap_or(false)
                })
                .unwrap_or(false);
            if !proposal_unlocks || self.proposal_block_hash() == Some(locked.hash()) {
                let parts = self.rs.locked_block_parts.as_ref().ok_or_else(|| {
                    ConsensusError::InvariantViolation("locked block without parts".into())
                })?;
                let header = parts.header();
                return self.sign_add_vote(
                    SignedMsgType::Prevote,
                    locked.hash(),
                    header,
                    height,
                    round,
                );
            }
        }

        // otherwise vote for a valid complete proposal, nil when absent
        let block = match (&self.rs.proposal_block, self.rs.is_proposal_complete()) {
            (Some(block), true) => Some(block.clone()),
            _ => None,
        };
        match block {
            Some(block) => {
                if let Err(err) = self.executor.validate_block(&self.state, &block) {
                    warn!("prevoting nil, invalid proposal: {}", err);
                    return self.sign_add_vote(
                        SignedMsgType::Prevote,
                        Hash::ZERO,
                        corten_models::block_id::PartSetHeader::ZERO,
                        height,
                        round,
                    );
                }
                let parts_header = self
                    .rs
                    .proposal_block_parts
                    .as_ref()
                    .map(|parts| parts.header())
                    .unwrap_or(corten_models::block_id::PartSetHeader::ZERO);
                self.sign_add_vote(
                    SignedMsgType::Prevote,
                    block.hash(),
                    parts_header,
                    height,
                    round,
                )
            }
            None => self.sign_add_vote(
                SignedMsgType::Prevote,
                Hash::ZERO,
                corten_models::block_id::PartSetHeader::ZERO,
                height,
                round,
            ),
        }
    }

    fn enter_prevote_wait(&mut self, height: Height, round: Round) -> ConsensusResult<()> {
        if height != self.rs.height
            || round < self.rs.round
            || (self.rs.round == round && self.rs.step >= RoundStep::PrevoteWait)
        {
            return Ok(());
        }
        debug!(height, round, "entering prevote wait");
        self.rs.step = RoundStep::PrevoteWait;
        self.broadcast_step();
        self.schedule_timeout(
            self.config.prevote_timeout(round),
            height,
            round,
            RoundStep::PrevoteWait,
        );
        Ok(())
    }

    fn enter_precommit(&mut self, height: Height, round: Round) -> ConsensusResult<()> {
        if height != self.rs.height
            || round < self.rs.round
            || (self.rs.round == round && self.rs.step >= RoundStep::Precommit)
        {
            return Ok(());
        }
        debug!(height, round, "entering precommit step");
        self.rs.step = RoundStep::Precommit;
        self.broadcast_step();

        let maj23 = self
            .rs
            .votes
            .prevotes(round)
            .and_then(|set| set.two_thirds_majority());

        let Some(block_id) = maj23 else {
            // no block majority: precommit nil, keep any lock
            return self.sign_add_vote(
                SignedMsgType::Precommit,
                Hash::ZERO,
                corten_models::block_id::PartSetHeader::ZERO,
                height,
                round,
            );
        };

        if block_id.is_zero() {
            // +2/3 prevoted nil: unlock
            debug!("+2/3 prevoted nil, unlocking");
            self.rs.locked_round = -1;
            self.rs.locked_block = None;
            self.rs.locked_block_parts = None;
            return self.sign_add_vote(
                SignedMsgType::Precommit,
                Hash::ZERO,
                corten_models::block_id::PartSetHeader::ZERO,
                height,
                round,
            );
        }

        // +2/3 for a block: relock, lock, or surrender the lock
        if self.rs.locked_block.as_ref().map(|block| block.hash()) == Some(block_id.hash) {
            self.rs.locked_round = round;
            return self.sign_add_vote(
                SignedMsgType::Precommit,
                block_id.hash,
                block_id.part_set_header,
                height,
                round,
            );
        }
        if self.proposal_block_hash() == Some(block_id.hash) {
            let block = self.rs.proposal_block.clone().expect("hash checked above");
            if let Err(err) = self.executor.validate_block(&self.state, &block) {
                return Err(ConsensusError::InvariantViolation(format!(
                    "+2/3 prevoted an invalid block: {}",
                    err
                )));
            }
            self.rs.locked_round = round;
            self.rs.locked_block = Some(block);
            self.rs.locked_block_parts = self.rs.proposal_block_parts.clone();
            return self.sign_add_vote(
                SignedMsgType::Precommit,
                block_id.hash,
                block_id.part_set_header,
                height,
                round,
            );
        }

        // a block we have not seen: drop the lock, fetch its parts
        self.rs.locked_round = -1;
        self.rs.locked_block = None;
        self.rs.locked_block_parts = None;
        if !self
            .rs
            .proposal_block_parts
            .as_ref()
            .map(|parts| parts.has_header(&block_id.part_set_header))
            .unwrap_or(false)
        {
            self.rs.proposal_block = None;
            self.rs.proposal_block_parts = Some(PartSet::from_header(block_id.part_set_header));
        }
        self.sign_add_vote(
            SignedMsgType::Precommit,
            Hash::ZERO,
            corten_models::block_id::PartSetHeader::ZERO,
            height,
            round,
        )
    }

    fn enter_precommit_wait(&mut self, height: Height, round: Round) -> ConsensusResult<()> {
        if height != self.rs.height
            || round < self.rs.round
            || (self.rs.round == round && self.rs.triggered_timeout_precommit)
        {
            return Ok(());
        }
        debug!(height, round, "entering precommit wait");
        self.rs.triggered_timeout_precommit = true;
        self.schedule_timeout(
            self.config.precommit_timeout(round),
            height,
            round,
            RoundStep::PrecommitWait,
        );
        Ok(())
    }

    fn enter_commit(&mut self, height: Height, commit_round: Round) -> ConsensusResult<()> {
        if height != self.rs.height || self.rs.step >= RoundStep::Commit {
            return Ok(());
        }
        info!(height, commit_round, "entering commit step");
        self.rs.step = RoundStep::Commit;
        self.rs.commit_round = commit_round;
        self.rs.commit_time = Timestamp::now()?;
        self.broadcast_step();

        let block_id = self
            .rs
            .votes
            .precommits(commit_round)
            .and_then(|set| set.two_thirds_majority())
            .ok_or_else(|| {
                ConsensusError::InvariantViolation(
                    "entered commit without a +2/3 precommit majority".into(),
                )
            })?;

        // the locked block is the committed block
        if self.rs.locked_block.as_ref().map(|block| block.hash()) == Some(block_id.hash) {
            self.rs.proposal_block = self.rs.locked_block.clone();
            self.rs.proposal_block_parts = self.rs.locked_block_parts.clone();
        }
        // start fetching the parts if we miss the block
        if self.proposal_block_hash() != Some(block_id.hash)
            && !self
                .rs
                .proposal_block_parts
                .as_ref()
                .map(|parts| parts.has_header(&block_id.part_set_header))
                .unwrap_or(false)
        {
            self.rs.proposal_block = None;
            self.rs.proposal_block_parts = Some(PartSet::from_header(block_id.part_set_header));
            self.emit_gossip(GossipEvent::NewValidBlock {
                height,
                round: commit_round,
                parts_header: block_id.part_set_header,
                parts: corten_models::bit_array::BitArray::new(
                    block_id.part_set_header.total as usize,
                ),
                is_commit: true,
            });
        }
        self.try_finalize_commit(height)
    }

    fn try_finalize_commit(&mut self, height: Height) -> ConsensusResult<()> {
        if self.rs.height != height || self.rs.step != RoundStep::Commit {
            return Ok(());
        }
        let block_id = self
            .rs
            .votes
            .precommits(self.rs.commit_round)
            .and_then(|set| set.two_thirds_majority())
            .unwrap_or(BlockId::ZERO);
        if block_id.is_zero() {
            return Ok(());
        }
        if self.proposal_block_hash() != Some(block_id.hash) {
            // waiting for parts
            return Ok(());
        }
        self.finalize_commit(height)
    }

    fn finalize_commit(&mut self, height: Height) -> ConsensusResult<()> {
        let block = self.rs.proposal_block.clone().ok_or_else(|| {
            ConsensusError::InvariantViolation("finalizing without a block".into())
        })?;
        let parts = self.rs.proposal_block_parts.clone().ok_or_else(|| {
            ConsensusError::InvariantViolation("finalizing without parts".into())
        })?;
        if !parts.is_complete() {
            return Err(ConsensusError::InvariantViolation(
                "finalizing with incomplete parts".into(),
            ));
        }
        let block_id = BlockId {
            hash: block.hash(),
            part_set_header: parts.header(),
        };
        info!(height, %block_id, "finalizing commit");

        let seen_commit = self
            .rs
            .votes
            .precommits(self.rs.commit_round)
            .ok_or_else(|| {
                ConsensusError::InvariantViolation("commit round votes missing".into())
            })?
            .make_commit()?;
        self.block_store.save_block(&block, &parts, &seen_commit)?;

        let timed = TimedWalMessage {
            time: Timestamp::now()?,
            msg: WalMessage::EndHeight(height),
        };
        self.wal.write_sync(&timed)?;

        let new_state = self.executor.apply_block(&self.state, block_id, &block)?;
        self.update_to_state(new_state)?;
        Ok(())
    }

    /// Move to the next height: fresh round state, precommit set of the
    /// decided height kept as the last commit.
    fn update_to_state(&mut self, new_state: State) -> ConsensusResult<()> {
        let height = new_state.last_block_height + 1;
        let last_commit = if self.rs.commit_round > -1 {
            self.rs.votes.precommits(self.rs.commit_round).cloned()
        } else {
            None
        };

        self.rs.validators = new_state.validators.clone();
        self.rs.height = height;
        self.rs.round = 0;
        self.rs.step = RoundStep::NewHeight;
        self.rs.commit_time = if self.rs.commit_time == Timestamp::ZERO {
            Timestamp::now()?
        } else {
            self.rs.commit_time
        };
        self.rs.start_time = self.rs.commit_time.saturating_add(self.config.timeout_commit);
        self.rs.proposal = None;
        self.rs.proposal_block = None;
        self.rs.proposal_block_parts = None;
        self.rs.locked_round = -1;
        self.rs.locked_block = None;
        self.rs.locked_block_parts = None;
        self.rs.valid_round = -1;
        self.rs.valid_block = None;
        self.rs.valid_block_parts = None;
        self.rs.votes = HeightVoteSet::new(
            &new_state.chain_id,
            height,
            Arc::new(new_state.validators.clone()),
        );
        self.rs.commit_round = -1;
        self.rs.last_commit = last_commit;
        self.rs.triggered_timeout_precommit = false;
        self.rs.commit_time = Timestamp::ZERO;
        self.state = new_state;

        self.broadcast_step();
        self.schedule_round_0();
        Ok(())
    }

    fn schedule_round_0(&mut self) {
        let now = Timestamp::now().unwrap_or(Timestamp::ZERO);
        let wait = self.rs.start_time.saturating_sub(now);
        self.schedule_timeout(wait, self.rs.height, 0, RoundStep::NewHeight);
    }

    // ---- proposals and parts ----------------------------------------------

    fn set_proposal(&mut self, proposal: Proposal) -> ConsensusResult<()> {
        if self.rs.proposal.is_some() {
            return Ok(());
        }
        if proposal.height != self.rs.height || proposal.round != self.rs.round {
            // not an error: rounds move fast under asynchrony
            return Ok(());
        }
        proposal.validate_basic()?;

        let proposer = self
            .rs
            .validators
            .get_proposer()
            .ok_or_else(|| ConsensusError::InvariantViolation("no proposer".into()))?;
        proposal
            .verify(&self.state.chain_id, &proposer.pub_key, &proposer.address)
            .map_err(|err| ConsensusError::InvalidProposal(err.to_string()))?;

        debug!(height = proposal.height, round = proposal.round, "received proposal");
        if self.rs.proposal_block_parts.is_none() {
            self.rs.proposal_block_parts =
                Some(PartSet::from_header(proposal.block_id.part_set_header));
        }
        self.rs.proposal = Some(proposal);
        Ok(())
    }

    fn add_proposal_block_part(
        &mut self,
        height: Height,
        _round: Round,
        part: Part,
    ) -> ConsensusResult<()> {
        if height != self.rs.height {
            return Ok(());
        }
        let parts = match self.rs.proposal_block_parts.as_mut() {
            Some(parts) => parts,
            // no proposal and no commit majority yet: nothing to verify against
            None => return Ok(()),
        };
        let added = parts.add_part(part)?;
        if !added || !parts.is_complete() {
            return Ok(());
        }

        let bytes = parts.assemble()?;
        let block = corten_models::block::Block::from_bytes(&bytes)?;
        if let Some(proposal) = &self.rs.proposal {
            if proposal.block_id.hash != block.hash() {
                self.rs.proposal_block = None;
                self.rs.proposal_block_parts = None;
                return Err(ConsensusError::InvalidProposal(
                    "assembled block does not match the proposal".into(),
                ));
            }
        }
        info!(height, hash = %block.hash(), "received complete proposal block");
        self.rs.proposal_block = Some(block);
        self.event_bus.publish(ConsensusEvent::NewProposal {
            height,
            round: self.rs.round,
        });

        // a late majority may already be waiting on this block
        if let Some((pol_round, pol_block_id)) = self.rs.votes.pol_info() {
            if self.rs.valid_round < pol_round
                && self.proposal_block_hash() == Some(pol_block_id.hash)
            {
                self.rs.valid_round = pol_round;
                self.rs.valid_block = self.rs.proposal_block.clone();
                self.rs.valid_block_parts = self.rs.proposal_block_parts.clone();
            }
        }

        if self.rs.step <= RoundStep::Propose && self.rs.is_proposal_complete() {
            self.enter_prevote(height, self.rs.round)?;
            if let Some(maj23) = self
                .rs
                .votes
                .prevotes(self.rs.round)
                .and_then(|set| set.two_thirds_majority())
            {
                if !maj23.is_zero() {
                    self.enter_precommit(height, self.rs.round)?;
                }
            }
        } else if self.rs.step == RoundStep::Commit {
            self.try_finalize_commit(height)?;
        }
        Ok(())
    }

    // ---- votes -------------------------------------------------------------

    fn try_add_vote(&mut self, vote: Vote, peer_id: Option<&str>) -> ConsensusResult<()> {
        match self.add_vote(vote, peer_id) {
            Ok(()) => Ok(()),
            Err(ConsensusError::InvalidVote(reason)) => {
                debug!("vote dropped: {}", reason);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn add_vote(&mut self, vote: Vote, peer_id: Option<&str>) -> ConsensusResult<()> {
        corten_trace!(
            "consensus.add_vote",
            height = vote.height,
            round = vote.round,
            vote_type = %vote.vote_type,
            index = vote.validator_index
        );

        // a late precommit of the previous height extends the seen commit
        if vote.height + 1 == self.rs.height && vote.vote_type == SignedMsgType::Precommit {
            if self.rs.step != RoundStep::NewHeight {
                return Ok(());
            }
            let added = match self.rs.last_commit.as_mut() {
                Some(last_commit) => last_commit.add_vote(&vote)?,
                None => false,
            };
            if added {
                self.emit_gossip(GossipEvent::HasVote {
                    height: vote.height,
                    round: vote.round,
                    vote_type: vote.vote_type,
                    index: vote.validator_index,
                });
                if self.config.skip_timeout_commit
                    && self
                        .rs
                        .last_commit
                        .as_ref()
                        .map(|commit| commit.has_all())
                        .unwrap_or(false)
                {
                    let height = self.rs.height;
                    self.enter_new_round(height, 0)?;
                }
            }
            return Ok(());
        }

        if vote.height != self.rs.height {
            // stale or future vote, dropped silently
            return Ok(());
        }

        let added = match self.rs.votes.add_vote(&vote, peer_id) {
            Ok(added) => added,
            Err(VoteSetError::ConflictingVotes(pair)) => {
                let (first, second) = *pair;
                if peer_id.is_some() {
                    warn!(
                        height = vote.height,
                        validator = %vote.validator_address,
                        "found conflicting votes, reporting to the evidence pool"
                    );
                    self.evidence_pool.report_conflicting_votes(first, second);
                } else {
                    error!("conflicting votes from our own signing path");
                }
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        if !added {
            return Ok(());
        }
        self.emit_gossip(GossipEvent::HasVote {
            height: vote.height,
            round: vote.round,
            vote_type: vote.vote_type,
            index: vote.validator_index,
        });

        match vote.vote_type {
            SignedMsgType::Prevote => self.on_prevote_added(&vote),
            SignedMsgType::Precommit => self.on_precommit_added(&vote),
            SignedMsgType::Proposal => Ok(()),
        }
    }

    fn on_prevote_added(&mut self, vote: &Vote) -> ConsensusResult<()> {
        let height = self.rs.height;
        let vote_round = vote.round;
        let maj23 = self
            .rs
            .votes
            .prevotes(vote_round)
            .and_then(|set| set.two_thirds_majority());

        if let Some(block_id) = maj23 {
            // a newer proof-of-lock voids an older lock on a different block
            if self.rs.locked_round < vote_round
                && vote_round <= self.rs.round
                && self
                    .rs
                    .locked_block
                    .as_ref()
                    .map(|locked| locked.hash() != block_id.hash)
                    .unwrap_or(false)
            {
                debug!(round = vote_round, "unlocking on a newer proof of lock");
                self.rs.locked_round = -1;
                self.rs.locked_block = None;
                self.rs.locked_block_parts = None;
            }
            // remember the newest block with a prevote majority
            if !block_id.is_zero() && self.rs.valid_round < vote_round && vote_round == self.rs.round
            {
                if self.proposal_block_hash() == Some(block_id.hash) {
                    self.rs.valid_round = vote_round;
                    self.rs.valid_block = self.rs.proposal_block.clone();
                    self.rs.valid_block_parts = self.rs.proposal_block_parts.clone();
                    let parts_bits = self
                        .rs
                        .valid_block_parts
                        .as_ref()
                        .map(|parts| parts.bit_array())
                        .unwrap_or_else(|| corten_models::bit_array::BitArray::new(0));
                    self.emit_gossip(GossipEvent::NewValidBlock {
                        height,
                        round: vote_round,
                        parts_header: block_id.part_set_header,
                        parts: parts_bits,
                        is_commit: false,
                    });
                } else if !self
                    .rs
                    .proposal_block_parts
                    .as_ref()
                    .map(|parts| parts.has_header(&block_id.part_set_header))
                    .unwrap_or(false)
                {
                    // the valid block is one we have not assembled yet
                    self.rs.proposal_block = None;
                    self.rs.proposal_block_parts =
                        Some(PartSet::from_header(block_id.part_set_header));
                }
            }
        }

        let has_two_thirds_any = self
            .rs
            .votes
            .prevotes(vote_round)
            .map(|set| set.has_two_thirds_any())
            .unwrap_or(false);

        if vote_round > self.rs.round && has_two_thirds_any {
            // round skip: the network is ahead of us
            return self.enter_new_round(height, vote_round);
        }
        if self.rs.round == vote_round && self.rs.step >= RoundStep::Prevote {
            if let Some(block_id) = maj23 {
                if self.rs.is_proposal_complete() || block_id.is_zero() {
                    self.enter_precommit(height, vote_round)?;
                } else {
                    self.enter_prevote_wait(height, vote_round)?;
                }
            } else if has_two_thirds_any && self.rs.step == RoundStep::Prevote {
                self.enter_prevote_wait(height, vote_round)?;
            }
        }
        if self
            .rs
            .proposal
            .as_ref()
            .map(|proposal| proposal.pol_round == vote_round)
            .unwrap_or(false)
            && self.rs.step == RoundStep::Propose
            && self.rs.is_proposal_complete()
        {
            let round = self.rs.round;
            self.enter_prevote(height, round)?;
        }
        Ok(())
    }

    fn on_precommit_added(&mut self, vote: &Vote) -> ConsensusResult<()> {
        let height = self.rs.height;
        let vote_round = vote.round;
        let maj23 = self
            .rs
            .votes
            .precommits(vote_round)
            .and_then(|set| set.two_thirds_majority());

        if let Some(block_id) = maj23 {
            self.enter_new_round(height, vote_round)?;
            self.enter_precommit(height, vote_round)?;
            if !block_id.is_zero() {
                self.enter_commit(height, vote_round)?;
                if self.config.skip_timeout_commit
                    && self
                        .rs
                        .votes
                        .precommits(vote_round)
                        .map(|set| set.has_all())
                        .unwrap_or(false)
                {
                    let new_height = self.rs.height;
                    self.enter_new_round(new_height, 0)?;
                }
            } else {
                self.enter_precommit_wait(height, vote_round)?;
            }
            return Ok(());
        }

        let has_two_thirds_any = self
            .rs
            .votes
            .precommits(vote_round)
            .map(|set| set.has_two_thirds_any())
            .unwrap_or(false);
        if self.rs.round <= vote_round && has_two_thirds_any {
            self.enter_new_round(height, vote_round)?;
            self.enter_precommit_wait(height, vote_round)?;
        }
        Ok(())
    }

    // ---- signing -----------------------------------------------------------

    fn sign_add_vote(
        &mut self,
        vote_type: SignedMsgType,
        hash: Hash,
        parts_header: corten_models::block_id::PartSetHeader,
        height: Height,
        round: Round,
    ) -> ConsensusResult<()> {
        if self.replay_mode {
            return Ok(());
        }
        let keypair = match &self.priv_validator {
            Some(keypair) => keypair.clone(),
            None => return Ok(()),
        };
        let our_address = self
            .priv_validator_address
            .expect("address derived with the keypair");
        let Some(index) = self.rs.validators.get_index_by_address(&our_address) else {
            // not a member of this height's set, nothing to sign
            return Ok(());
        };

        let mut vote = Vote {
            vote_type,
            height,
            round,
            block_id: BlockId {
                hash,
                part_set_header: parts_header,
            },
            timestamp: self.vote_time()?,
            validator_address: our_address,
            validator_index: index as i32,
            signature: Signature::from_bytes(&[0u8; SIGNATURE_SIZE_BYTES]),
        };
        vote.sign(&self.state.chain_id, &keypair);
        debug!(height, round, vote_type = %vote_type, "signed vote");

        self.event_bus
            .publish(ConsensusEvent::Vote { vote: vote.clone() });
        self.emit_gossip(GossipEvent::Vote(vote.clone()));
        self.send_internal(ConsensusMessage::Vote(vote))?;
        self.wal.flush_and_sync()?;
        Ok(())
    }

    /// Vote timestamps must stay ahead of the last block time even on hosts
    /// with a lagging clock.
    fn vote_time(&self) -> ConsensusResult<Timestamp> {
        let now = Timestamp::now()?;
        let floor = self
            .state
            .last_block_time
            .saturating_add(Timestamp::from_millis(1));
        Ok(now.max(floor))
    }

    /// Loop one of our own messages through the mailbox path: logged, then
    /// handled like any peer message.
    fn send_internal(&mut self, msg: ConsensusMessage) -> ConsensusResult<()> {
        let info = MessageInfo { msg, peer_id: None };
        let timed = TimedWalMessage {
            time: Timestamp::now()?,
            msg: WalMessage::Message(info.clone()),
        };
        self.wal.write(&timed)?;
        if let Err(err) = self.handle_msg(info) {
            debug!("internal message dropped: {}", err);
        }
        Ok(())
    }

    // ---- plumbing ----------------------------------------------------------

    fn proposal_block_hash(&self) -> Option<Hash> {
        self.rs.proposal_block.as_ref().map(|block| block.hash())
    }

    fn schedule_timeout(
        &mut self,
        duration: Timestamp,
        height: Height,
        round: Round,
        step: RoundStep,
    ) {
        if self.replay_mode {
            return;
        }
        let deadline = Instant::now() + duration.to_duration();
        self.timeout_slot = Some((
            deadline,
            TimeoutInfo {
                duration,
                height,
                round,
                step,
            },
        ));
    }

    fn broadcast_step(&mut self) {
        let summary = self.rs.summary();
        self.emit_gossip(GossipEvent::RoundStep(summary));
    }

    fn emit_gossip(&mut self, event: GossipEvent) {
        if self.replay_mode {
            return;
        }
        // gossip is best-effort: when the reactor lags, drop rather than
        // stall the state machine
        let _ = self.gossip_tx.try_send(event);
    }

    /// Read access for tests and the gossip layer bootstrap.
    pub fn round_state(&self) -> &RoundState {
        &self.rs
    }

    /// The committed state the machine extends.
    pub fn committed_state(&self) -> &State {
        &self.state
    }

    /// Validator set of the current height.
    pub fn validators(&self) -> &ValidatorSet {
        &self.rs.validators
    }
}
