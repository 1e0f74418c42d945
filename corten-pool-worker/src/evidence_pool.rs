//! The evidence pool: verification, pending/committed storage, expiry, and
//! the buffer of conflicting votes reported by vote sets.

use corten_db::{DbBatch, DbController};
use corten_hash::Hash;
use corten_logging::corten_trace;
use corten_models::evidence::{DuplicateVoteEvidence, Evidence, EvidenceDeserializer, EvidenceList};
use corten_models::state::State;
use corten_models::validator::ValidatorSet;
use corten_models::vote::Vote;
use corten_models::Height;
use corten_pool_exports::{
    EvidencePoolController, PoolChannels, PoolConfig, PoolError, PoolResult,
};
use corten_serialization::{DeserializeError, Deserializer};
use corten_storage::{BlockStore, StateStore};
use corten_time::Timestamp;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const PREFIX_COMMITTED: u8 = 0x09;
const PREFIX_PENDING: u8 = 0x0a;

fn evidence_key(prefix: u8, height: Height, hash: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(41);
    key.push(prefix);
    key.extend_from_slice(&(height as u64).to_be_bytes());
    key.extend_from_slice(hash.to_bytes());
    key
}

/// Detection, staging, expiry, and verification of byzantine-behavior
/// evidence. Pending evidence lives under one key prefix sorted by height so
/// that proposals pick the oldest first; committed hashes live under another
/// to block re-inclusion.
pub struct EvidencePool {
    config: PoolConfig,
    db: Arc<dyn DbController>,
    state_store: StateStore,
    block_store: BlockStore,
    channels: PoolChannels,
    state: Mutex<State>,
    consensus_buffer: Mutex<Vec<(Vote, Vote)>>,
    pending_size: AtomicUsize,
    pruning: Mutex<(Height, Timestamp)>,
}

impl EvidencePool {
    /// Open the pool, counting already-pending evidence and computing the
    /// first pruning watermark.
    pub fn new(
        config: PoolConfig,
        db: Arc<dyn DbController>,
        state_store: StateStore,
        block_store: BlockStore,
        channels: PoolChannels,
    ) -> PoolResult<Self> {
        let state = state_store
            .load()?
            .ok_or_else(|| PoolError::Models("no state in store".into()))?;
        let pool = EvidencePool {
            config,
            db,
            state_store,
            block_store,
            channels,
            state: Mutex::new(state),
            consensus_buffer: Mutex::new(Vec::new()),
            pending_size: AtomicUsize::new(0),
            pruning: Mutex::new((0, Timestamp::ZERO)),
        };
        let pending = pool.list_pending(i64::MAX)?.0.len();
        pool.pending_size.store(pending, Ordering::Relaxed);
        let watermark = pool.remove_expired_pending_evidence()?;
        *pool.pruning.lock() = watermark;
        Ok(pool)
    }

    fn current_state(&self) -> State {
        self.state.lock().clone()
    }

    /// Evidence expiry: both the height window and the time window must be
    /// exceeded.
    pub fn is_expired(&self, height: Height, time: Timestamp) -> bool {
        let state = self.current_state();
        let params = &state.consensus_params.evidence;
        let age_blocks = state.last_block_height - height;
        let age_time = state.last_block_time.saturating_sub(time);
        age_blocks > params.max_age_num_blocks && age_time > params.max_age_duration
    }

    fn is_pending(&self, evidence: &Evidence) -> PoolResult<bool> {
        let key = evidence_key(PREFIX_PENDING, evidence.height(), &evidence.hash());
        Ok(self.db.contains(&key)?)
    }

    fn is_committed(&self, evidence: &Evidence) -> PoolResult<bool> {
        let key = evidence_key(PREFIX_COMMITTED, evidence.height(), &evidence.hash());
        Ok(self.db.contains(&key)?)
    }

    fn add_pending(&self, evidence: &Evidence) -> PoolResult<()> {
        let key = evidence_key(PREFIX_PENDING, evidence.height(), &evidence.hash());
        self.db.put(key, evidence.bytes())?;
        self.pending_size.fetch_add(1, Ordering::Relaxed);
        if let Some(broadcast) = &self.channels.broadcast_evidence {
            let _ = broadcast.try_send(evidence.clone());
        }
        Ok(())
    }

    fn list_pending(&self, max_bytes: i64) -> PoolResult<(Vec<Evidence>, i64)> {
        let deserializer = EvidenceDeserializer::new();
        let mut evidence = Vec::new();
        let mut used: i64 = 0;
        for (key, value) in self.db.prefix_iterator(&[PREFIX_PENDING]) {
            if evidence.len() >= self.config.max_pending_evidence {
                break;
            }
            let (_, decoded) = deserializer
                .deserialize::<DeserializeError>(&value)
                .map_err(|_| {
                    PoolError::Models(format!("corrupted pending evidence at {:?}", key))
                })?;
            let size = value.len() as i64;
            if used + size > max_bytes {
                break;
            }
            used += size;
            evidence.push(decoded);
        }
        Ok((evidence, used))
    }

    /// Verify evidence against recorded chain state.
    fn verify(&self, evidence: &Evidence) -> PoolResult<()> {
        let state = self.current_state();
        let height = evidence.height();
        if self.is_expired(height, evidence.timestamp()) {
            return Err(PoolError::ExpiredEvidence(height));
        }
        let validators = self
            .state_store
            .load_validators(height)?
            .ok_or_else(|| {
                PoolError::InvalidEvidence(format!("no validator set recorded at {}", height))
            })?;
        let block_time = self
            .block_store
            .load_block_meta(height)?
            .map(|meta| meta.header.time)
            .ok_or_else(|| {
                PoolError::InvalidEvidence(format!("no block recorded at {}", height))
            })?;

        match evidence {
            Evidence::DuplicateVote(ev) => {
                self.verify_duplicate_vote(ev, &state.chain_id, &validators, block_time)
            }
            Evidence::LightClientAttack(ev) => {
                // the commit of the conflicting block must carry +2/3 of the
                // recorded set at the common height
                let common_validators = self
                    .state_store
                    .load_validators(ev.common_height)?
                    .ok_or_else(|| {
                        PoolError::InvalidEvidence(format!(
                            "no validator set recorded at common height {}",
                            ev.common_height
                        ))
                    })?;
                if ev.total_voting_power != common_validators.total_voting_power() {
                    return Err(PoolError::InvalidEvidence(
                        "recorded total voting power does not match the common set".into(),
                    ));
                }
                if ev.timestamp != block_time {
                    return Err(PoolError::InvalidEvidence(
                        "evidence time differs from the block it is associated with".into(),
                    ));
                }
                evidence
                    .validate_basic()
                    .map_err(|err| PoolError::InvalidEvidence(err.to_string()))?;
                Ok(())
            }
        }
    }

    fn verify_duplicate_vote(
        &self,
        ev: &DuplicateVoteEvidence,
        chain_id: &str,
        validators: &ValidatorSet,
        block_time: Timestamp,
    ) -> PoolResult<()> {
        // (a) the offender is in the set at that height
        let validator = validators
            .get_by_address(&ev.vote_a.validator_address)
            .ok_or_else(|| {
                PoolError::InvalidEvidence("offending validator is not in the set".into())
            })?;
        // (b) both votes verify individually
        ev.vote_a
            .verify(chain_id, &validator.pub_key)
            .map_err(|err| PoolError::InvalidEvidence(err.to_string()))?;
        ev.vote_b
            .verify(chain_id, &validator.pub_key)
            .map_err(|err| PoolError::InvalidEvidence(err.to_string()))?;
        // (c) the votes bind different blocks
        if ev.vote_a.block_id == ev.vote_b.block_id {
            return Err(PoolError::InvalidEvidence(
                "votes bind the same block id".into(),
            ));
        }
        // (d) same (height, round, type) and (e) canonical order
        ev.validate_basic()
            .map_err(|err| PoolError::InvalidEvidence(err.to_string()))?;
        // (f) recorded context matches our state at that height
        if ev.validator_power != validator.voting_power {
            return Err(PoolError::InvalidEvidence(
                "recorded validator power does not match the set".into(),
            ));
        }
        if ev.total_voting_power != validators.total_voting_power() {
            return Err(PoolError::InvalidEvidence(
                "recorded total voting power does not match the set".into(),
            ));
        }
        if ev.timestamp != block_time {
            return Err(PoolError::InvalidEvidence(
                "evidence time differs from the block it is associated with".into(),
            ));
        }
        Ok(())
    }

    /// Turn buffered conflicting votes into evidence now that the state has
    /// caught up with their heights.
    fn process_consensus_buffer(&self, new_state: &State) {
        let buffered: Vec<(Vote, Vote)> = std::mem::take(&mut *self.consensus_buffer.lock());
        for (vote_a, vote_b) in buffered {
            let built = if vote_a.height == new_state.last_block_height {
                DuplicateVoteEvidence::new(
                    vote_a,
                    vote_b,
                    new_state.last_block_time,
                    &new_state.last_validators,
                )
            } else if vote_a.height < new_state.last_block_height {
                let validators = match self.state_store.load_validators(vote_a.height) {
                    Ok(Some(validators)) => validators,
                    _ => {
                        error!(
                            height = vote_a.height,
                            "failed to load validator set for conflicting votes"
                        );
                        continue;
                    }
                };
                let block_time = match self.block_store.load_block_meta(vote_a.height) {
                    Ok(Some(meta)) => meta.header.time,
                    _ => {
                        error!(
                            height = vote_a.height,
                            "failed to load block meta for conflicting votes"
                        );
                        continue;
                    }
                };
                DuplicateVoteEvidence::new(vote_a, vote_b, block_time, &validators)
            } else {
                error!(
                    height = vote_a.height,
                    "conflicting votes are ahead of the committed state"
                );
                continue;
            };

            let evidence = match built {
                Ok(ev) => Evidence::DuplicateVote(ev),
                Err(err) => {
                    error!("error generating evidence from votes: {}", err);
                    continue;
                }
            };
            match (self.is_pending(&evidence), self.is_committed(&evidence)) {
                (Ok(false), Ok(false)) => {}
                _ => {
                    debug!(%evidence, "evidence already known");
                    continue;
                }
            }
            if let Err(err) = self.add_pending(&evidence) {
                error!("failed to flush evidence from the consensus buffer: {}", err);
                continue;
            }
            info!(%evidence, "verified new evidence of byzantine behavior");
        }
    }

    fn mark_committed(&self, committed: &EvidenceList) -> PoolResult<()> {
        let mut batch = DbBatch::new();
        let mut removed = 0usize;
        for evidence in &committed.evidence {
            let hash = evidence.hash();
            batch.insert(
                evidence_key(PREFIX_COMMITTED, evidence.height(), &hash),
                Some(Vec::new()),
            );
            let pending_key = evidence_key(PREFIX_PENDING, evidence.height(), &hash);
            if self.db.contains(&pending_key)? {
                batch.insert(pending_key, None);
                removed += 1;
            }
        }
        self.db.write_batch(batch)?;
        self.pending_size.fetch_sub(removed, Ordering::Relaxed);
        Ok(())
    }

    /// Scan pending evidence and drop everything expired, returning the next
    /// (height, time) at which an eviction can first happen again.
    fn remove_expired_pending_evidence(&self) -> PoolResult<(Height, Timestamp)> {
        let state = self.current_state();
        let params = &state.consensus_params.evidence;
        let deserializer = EvidenceDeserializer::new();
        let mut batch = DbBatch::new();
        let mut removed = 0usize;
        let mut next_height = state.last_block_height + params.max_age_num_blocks + 1;
        let mut next_time = state
            .last_block_time
            .saturating_add(params.max_age_duration);
        for (key, value) in self.db.prefix_iterator(&[PREFIX_PENDING]) {
            let (_, evidence) = deserializer
                .deserialize::<DeserializeError>(&value)
                .map_err(|_| PoolError::Models("corrupted pending evidence".into()))?;
            if !self.is_expired(evidence.height(), evidence.timestamp()) {
                // pending evidence is height-ordered, the first fresh item
                // bounds the next eviction window
                next_height = evidence.height() + params.max_age_num_blocks + 1;
                next_time = evidence
                    .timestamp()
                    .saturating_add(params.max_age_duration);
                break;
            }
            batch.insert(key, None);
            removed += 1;
        }
        self.db.write_batch(batch)?;
        self.pending_size.fetch_sub(removed, Ordering::Relaxed);
        if removed > 0 {
            debug!(removed, "expired pending evidence");
        }
        Ok((next_height, next_time))
    }
}

impl EvidencePoolController for EvidencePool {
    fn pending_evidence(&self, max_bytes: i64) -> (Vec<Evidence>, i64) {
        if self.pending_size.load(Ordering::Relaxed) == 0 {
            return (Vec::new(), 0);
        }
        match self.list_pending(max_bytes) {
            Ok(result) => result,
            Err(err) => {
                error!("failed to retrieve pending evidence: {}", err);
                (Vec::new(), 0)
            }
        }
    }

    fn add_evidence(&self, evidence: Evidence) -> PoolResult<()> {
        corten_trace!("evidence_pool.add_evidence", evidence = %evidence);
        if self.is_pending(&evidence)? {
            debug!("evidence already pending; ignoring");
            return Ok(());
        }
        if self.is_committed(&evidence)? {
            debug!("evidence already committed; ignoring");
            return Ok(());
        }
        self.verify(&evidence)?;
        self.add_pending(&evidence)?;
        info!(%evidence, "verified new evidence of byzantine behavior");
        Ok(())
    }

    fn check_evidence(&self, list: &EvidenceList) -> PoolResult<()> {
        let mut hashes: Vec<Hash> = Vec::with_capacity(list.evidence.len());
        for evidence in &list.evidence {
            let needs_verification = matches!(evidence, Evidence::LightClientAttack(_))
                || !self.is_pending(evidence)?;
            if needs_verification {
                if self.is_committed(evidence)? {
                    return Err(PoolError::CommittedEvidence);
                }
                self.verify(evidence)?;
                if let Err(err) = self.add_pending(evidence) {
                    warn!("failed to stage checked evidence: {}", err);
                }
            }
            let hash = evidence.hash();
            if hashes.contains(&hash) {
                return Err(PoolError::DuplicateEvidence);
            }
            hashes.push(hash);
        }
        Ok(())
    }

    fn update(&self, new_state: &State, committed: &EvidenceList) -> PoolResult<()> {
        {
            let state = self.state.lock();
            if new_state.last_block_height <= state.last_block_height {
                return Err(PoolError::Models(format!(
                    "evidence pool update regresses height: {} <= {}",
                    new_state.last_block_height, state.last_block_height
                )));
            }
        }
        debug!(
            height = new_state.last_block_height,
            "updating evidence pool"
        );
        self.process_consensus_buffer(new_state);
        *self.state.lock() = new_state.clone();
        self.mark_committed(committed)?;

        let (pruning_height, pruning_time) = *self.pruning.lock();
        if self.pending_size.load(Ordering::Relaxed) > 0
            && new_state.last_block_height > pruning_height
            && new_state.last_block_time > pruning_time
        {
            let watermark = self.remove_expired_pending_evidence()?;
            *self.pruning.lock() = watermark;
        }
        Ok(())
    }

    fn report_conflicting_votes(&self, vote_a: Vote, vote_b: Vote) {
        self.consensus_buffer.lock().push((vote_a, vote_b));
    }

    fn size(&self) -> usize {
        self.pending_size.load(Ordering::Relaxed)
    }
}
