use crate::evidence_pool::EvidencePool;
use corten_db::MemDb;
use corten_hash::Hash;
use corten_models::address::Address;
use corten_models::block::{Block, BlockHeader, Data, Tx, Version};
use corten_models::block_id::{BlockId, PartSetHeader};
use corten_models::evidence::{DuplicateVoteEvidence, Evidence, EvidenceList};
use corten_models::genesis::{GenesisDoc, GenesisValidator};
use corten_models::state::State;
use corten_models::validator::ValidatorSet;
use corten_models::vote::{Commit, SignedMsgType, Vote};
use corten_pool_exports::{EvidencePoolController, PoolChannels, PoolConfig, PoolError};
use corten_signature::{KeyPair, Signature, SIGNATURE_SIZE_BYTES};
use corten_storage::{BlockStore, StateStore};
use corten_time::Timestamp;
use std::sync::Arc;

const CHAIN_ID: &str = "evidence-test";

struct Fixture {
    keypair: KeyPair,
    pool: Arc<EvidencePool>,
    state: State,
}

fn block_at(height: i64, time: Timestamp) -> Block {
    let data = Data {
        txs: vec![Tx(vec![height as u8])],
    };
    let evidence = EvidenceList::default();
    let mut last_commit = Commit::empty();
    if height > 1 {
        last_commit.height = height - 1;
    }
    let header = BlockHeader {
        version: Version { block: 11, app: 0 },
        chain_id: CHAIN_ID.into(),
        height,
        time,
        last_block_id: BlockId::ZERO,
        last_commit_hash: last_commit.hash(),
        data_hash: data.hash(),
        validators_hash: Hash::compute_from(b"vals"),
        next_validators_hash: Hash::compute_from(b"next"),
        consensus_hash: Hash::compute_from(b"params"),
        app_hash: vec![],
        last_results_hash: Hash::compute_from(b"results"),
        evidence_hash: evidence.hash(),
        proposer_address: Address::from_bytes(&[1u8; 20]),
    };
    Block {
        header,
        data,
        evidence,
        last_commit,
    }
}

fn block_time_at(height: i64) -> Timestamp {
    Timestamp::from_millis(1_000 + height as u64)
}

/// A chain of 6 committed heights with one validator, all stores populated.
fn fixture() -> Fixture {
    let keypair = KeyPair::generate();
    let genesis = GenesisDoc {
        genesis_time: Timestamp::from_millis(1_000),
        chain_id: CHAIN_ID.into(),
        initial_height: 1,
        consensus_params: None,
        validators: vec![GenesisValidator {
            address: None,
            pub_key: keypair.get_public_key(),
            power: 10,
            name: None,
        }],
        app_state: serde_json::Value::Null,
        app_hash: None,
    };
    let mut state = State::from_genesis(&genesis).unwrap();
    state.last_validators = state.validators.clone();

    let db: Arc<MemDb> = Arc::new(MemDb::new());
    let state_store = StateStore::new(db.clone());
    let block_store = BlockStore::new(db.clone());
    for height in 0..=6 {
        state.last_block_height = height;
        state.last_block_time = block_time_at(height);
        state_store.save(&state).unwrap();
        if height > 0 {
            let block = block_at(height, block_time_at(height));
            let parts = block.make_part_set().unwrap();
            let mut seen = Commit::empty();
            seen.height = height;
            block_store.save_block(&block, &parts, &seen).unwrap();
        }
    }

    let pool = EvidencePool::new(
        PoolConfig::default(),
        db,
        state_store,
        block_store,
        PoolChannels::default(),
    )
    .unwrap();
    Fixture {
        keypair,
        pool: Arc::new(pool),
        state,
    }
}

fn block_id(tag: &[u8]) -> BlockId {
    BlockId {
        hash: Hash::compute_from(tag),
        part_set_header: PartSetHeader {
            total: 1,
            hash: Hash::compute_from(tag),
        },
    }
}

fn signed_vote(keypair: &KeyPair, height: i64, id: BlockId) -> Vote {
    let mut vote = Vote {
        vote_type: SignedMsgType::Precommit,
        height,
        round: 1,
        block_id: id,
        timestamp: Timestamp::from_millis(500),
        validator_address: Address::from_public_key(&keypair.get_public_key()),
        validator_index: 0,
        signature: Signature::from_bytes(&[0u8; SIGNATURE_SIZE_BYTES]),
    };
    vote.sign(CHAIN_ID, keypair);
    vote
}

fn duplicate_vote_evidence(fixture: &Fixture, height: i64) -> Evidence {
    let validators: &ValidatorSet = &fixture.state.validators;
    let evidence = DuplicateVoteEvidence::new(
        signed_vote(&fixture.keypair, height, block_id(b"a")),
        signed_vote(&fixture.keypair, height, block_id(b"b")),
        block_time_at(height),
        validators,
    )
    .unwrap();
    Evidence::DuplicateVote(evidence)
}

#[test]
fn add_verify_and_list_pending() {
    let fixture = fixture();
    let evidence = duplicate_vote_evidence(&fixture, 5);
    fixture.pool.add_evidence(evidence.clone()).unwrap();
    assert_eq!(fixture.pool.size(), 1);

    // idempotent
    fixture.pool.add_evidence(evidence.clone()).unwrap();
    assert_eq!(fixture.pool.size(), 1);

    let (pending, bytes) = fixture.pool.pending_evidence(i64::MAX);
    assert_eq!(pending, vec![evidence]);
    assert!(bytes > 0);

    // a zero-byte budget returns nothing
    let (pending, bytes) = fixture.pool.pending_evidence(0);
    assert!(pending.is_empty());
    assert_eq!(bytes, 0);
}

#[test]
fn mismatched_recorded_power_rejected() {
    let fixture = fixture();
    let mut tampered = match duplicate_vote_evidence(&fixture, 5) {
        Evidence::DuplicateVote(ev) => ev,
        _ => unreachable!(),
    };
    tampered.validator_power += 1;
    assert!(matches!(
        fixture.pool.add_evidence(Evidence::DuplicateVote(tampered)),
        Err(PoolError::InvalidEvidence(_))
    ));
    assert_eq!(fixture.pool.size(), 0);
}

#[test]
fn update_marks_committed_and_blocks_reinclusion() {
    let fixture = fixture();
    let evidence = duplicate_vote_evidence(&fixture, 5);
    fixture.pool.add_evidence(evidence.clone()).unwrap();

    let mut new_state = fixture.state.clone();
    new_state.last_block_height = 7;
    new_state.last_block_time = block_time_at(7);
    let committed = EvidenceList {
        evidence: vec![evidence.clone()],
    };
    fixture.pool.update(&new_state, &committed).unwrap();
    assert_eq!(fixture.pool.size(), 0);

    // committed evidence cannot be checked into another block
    assert!(matches!(
        fixture.pool.check_evidence(&committed),
        Err(PoolError::CommittedEvidence)
    ));
    // re-adding is silently ignored
    fixture.pool.add_evidence(evidence).unwrap();
    assert_eq!(fixture.pool.size(), 0);
}

#[test]
fn update_refuses_height_regression() {
    let fixture = fixture();
    let same_height_state = fixture.state.clone();
    assert!(fixture
        .pool
        .update(&same_height_state, &EvidenceList::default())
        .is_err());
}

#[test]
fn conflicting_votes_become_evidence_on_update() {
    let fixture = fixture();
    let vote_a = signed_vote(&fixture.keypair, 7, block_id(b"x"));
    let vote_b = signed_vote(&fixture.keypair, 7, block_id(b"y"));
    fixture.pool.report_conflicting_votes(vote_a, vote_b);
    assert_eq!(fixture.pool.size(), 0);

    let mut new_state = fixture.state.clone();
    new_state.last_block_height = 7;
    new_state.last_block_time = block_time_at(7);
    fixture
        .pool
        .update(&new_state, &EvidenceList::default())
        .unwrap();
    assert_eq!(fixture.pool.size(), 1);

    let (pending, _) = fixture.pool.pending_evidence(i64::MAX);
    match &pending[0] {
        Evidence::DuplicateVote(ev) => {
            assert!(ev.vote_a.block_id.key() < ev.vote_b.block_id.key());
            assert_eq!(ev.validator_power, 10);
            assert_eq!(ev.total_voting_power, 10);
            assert_eq!(ev.timestamp, new_state.last_block_time);
        }
        other => panic!("unexpected evidence {}", other),
    }
}

#[test]
fn duplicate_in_checked_list_rejected() {
    let fixture = fixture();
    let evidence = duplicate_vote_evidence(&fixture, 5);
    let list = EvidenceList {
        evidence: vec![evidence.clone(), evidence],
    };
    assert!(matches!(
        fixture.pool.check_evidence(&list),
        Err(PoolError::DuplicateEvidence)
    ));
}

#[test]
fn expired_evidence_is_pruned() {
    let fixture = fixture();
    let evidence = duplicate_vote_evidence(&fixture, 5);
    fixture.pool.add_evidence(evidence).unwrap();

    // jump far past both expiry windows and the pruning watermark
    let mut new_state = fixture.state.clone();
    new_state.last_block_height = new_state.consensus_params.evidence.max_age_num_blocks * 2;
    new_state.last_block_time = block_time_at(5)
        .saturating_add(new_state.consensus_params.evidence.max_age_duration)
        .saturating_add(Timestamp::from_millis(1_000));
    fixture
        .pool
        .update(&new_state, &EvidenceList::default())
        .unwrap();
    assert_eq!(fixture.pool.size(), 0);
}
