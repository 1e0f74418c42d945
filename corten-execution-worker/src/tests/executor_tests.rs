use crate::tests::tools::{advance_one_block, fixture, GENESIS_TIME};
use corten_execution_exports::ConsensusEvent;
use corten_models::abci::ValidatorUpdate;
use corten_models::block::Tx;
use corten_models::vote::Commit;
use corten_signature::KeyPair;
use std::sync::atomic::Ordering;

#[test]
fn first_block_advances_state() {
    let mut fx = fixture(2);
    let mut events = fx.event_bus.subscribe();

    let (block, _) = advance_one_block(&mut fx, vec![Tx(vec![1, 0]), Tx(vec![2, 0])]);
    assert_eq!(block.header.height, 1);
    assert_eq!(block.header.time, GENESIS_TIME);
    assert_eq!(block.data.txs.len(), 2);

    assert_eq!(fx.state.last_block_height, 1);
    assert_eq!(fx.state.last_block_id.hash, block.hash());
    assert_eq!(fx.app.delivered.load(Ordering::SeqCst), 2);
    // app hash adopted from commit
    assert_eq!(fx.state.app_hash, 2i64.to_le_bytes().to_vec());
    // persisted
    assert_eq!(fx.state_store.load().unwrap().unwrap(), fx.state);
    let responses = fx.state_store.load_abci_responses(1).unwrap().unwrap();
    assert_eq!(responses.deliver_txs.len(), 2);

    // event order: NewBlock, NewBlockHeader, then per-tx events
    assert!(matches!(
        events.try_recv().unwrap(),
        ConsensusEvent::NewBlock { .. }
    ));
    assert!(matches!(
        events.try_recv().unwrap(),
        ConsensusEvent::NewBlockHeader { .. }
    ));
    for expected_index in 0..2u32 {
        match events.try_recv().unwrap() {
            ConsensusEvent::Tx { index, height, .. } => {
                assert_eq!(index, expected_index);
                assert_eq!(height, 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert!(events.try_recv().is_err());

    // committed txs left the pool
    assert_eq!(fx.tx_pool.size(), 0);
}

#[test]
fn chain_of_blocks_keeps_time_monotone() {
    let mut fx = fixture(2);
    let (first, _) = advance_one_block(&mut fx, vec![Tx(vec![1, 0])]);
    let (second, _) = advance_one_block(&mut fx, vec![]);
    let (third, _) = advance_one_block(&mut fx, vec![]);
    assert!(second.header.time > first.header.time);
    assert!(third.header.time > second.header.time);
    assert_eq!(fx.state.last_block_height, 3);
    // block 2 carries the results of block 1 (one tx), block 3 those of the
    // empty block 2
    assert_ne!(second.header.last_results_hash, third.header.last_results_hash);
}

#[test]
fn failed_txs_recorded_not_fatal() {
    let mut fx = fixture(1);
    let (_, _) = advance_one_block(&mut fx, vec![Tx(vec![0xff, 0]), Tx(vec![1, 0])]);
    let responses = fx.state_store.load_abci_responses(1).unwrap().unwrap();
    let codes: Vec<u32> = responses.deliver_txs.iter().map(|r| r.code).collect();
    assert!(codes.contains(&1));
    assert!(codes.contains(&0));
    assert_eq!(fx.state.last_block_height, 1);
}

#[test]
fn validator_updates_shift_into_next_set() {
    let mut fx = fixture(2);
    advance_one_block(&mut fx, vec![]);

    let newcomer = KeyPair::generate();
    fx.app.next_validator_updates.lock().push(ValidatorUpdate {
        pub_key: newcomer.get_public_key(),
        power: 5,
    });
    let mut events = fx.event_bus.subscribe();
    advance_one_block(&mut fx, vec![]);

    // the set signing H+1 is unchanged; the set signing H+2 has the newcomer
    assert_eq!(fx.state.validators.size(), 2);
    assert_eq!(fx.state.next_validators.size(), 3);
    assert_eq!(fx.state.last_height_validators_changed, 2 + 2);

    let mut saw_update_event = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, ConsensusEvent::ValidatorSetUpdates { .. }) {
            saw_update_event = true;
        }
    }
    assert!(saw_update_event);
}

#[test]
fn retain_height_prunes_stores() {
    let mut fx = fixture(1);
    for _ in 0..5 {
        advance_one_block(&mut fx, vec![]);
    }
    assert_eq!(fx.block_store.base().unwrap(), 1);

    fx.app.retain_height.store(4, Ordering::SeqCst);
    advance_one_block(&mut fx, vec![]);
    assert_eq!(fx.block_store.base().unwrap(), 4);
    assert_eq!(fx.block_store.height().unwrap(), 6);
    assert!(fx.state_store.load_validators(3).unwrap().is_none());
}

#[test]
fn wrong_app_hash_rejected() {
    let mut fx = fixture(1);
    advance_one_block(&mut fx, vec![]);

    let proposer = fx.state.validators.validators[0].address;
    let mut tampered_state = fx.state.clone();
    tampered_state.app_hash = vec![9, 9, 9];
    let (bad_block, parts) = fx
        .executor
        .create_proposal_block(
            2,
            &tampered_state,
            crate::tests::tools::signed_commit(
                &fx.keypairs,
                &fx.state,
                fx.state.last_block_id,
                1,
                fx.state
                    .last_block_time
                    .saturating_add(corten_time::Timestamp::from_millis(500)),
            ),
            proposer,
        )
        .unwrap();
    let block_id = corten_models::block_id::BlockId {
        hash: bad_block.hash(),
        part_set_header: parts.header(),
    };
    assert!(fx.executor.apply_block(&fx.state, block_id, &bad_block).is_err());
}

#[test]
fn handshake_replays_missed_blocks_to_a_fresh_app() {
    use crate::tests::tools::{CountingApp, CHAIN_ID};
    use crate::{BlockExecutor, Handshaker};
    use corten_execution_exports::EventBus;
    use corten_models::genesis::{GenesisDoc, GenesisValidator};
    use corten_pool_exports::{PoolChannels, PoolConfig};
    use corten_pool_worker::{EvidencePool, TxPool};
    use std::sync::Arc;

    let mut fx = fixture(1);
    advance_one_block(&mut fx, vec![Tx(vec![1, 0])]);
    advance_one_block(&mut fx, vec![Tx(vec![2, 0]), Tx(vec![3, 0])]);

    // a restarted node: same stores, a fresh application at height 0
    let fresh_app = Arc::new(CountingApp::default());
    let pool_config = PoolConfig {
        broadcast: false,
        recheck: false,
        ..Default::default()
    };
    let tx_pool = Arc::new(TxPool::new(
        pool_config.clone(),
        fresh_app.clone(),
        PoolChannels::default(),
        1,
    ));
    let evidence_pool = Arc::new(
        EvidencePool::new(
            pool_config,
            Arc::new(corten_db::MemDb::new()),
            fx.state_store.clone(),
            fx.block_store.clone(),
            PoolChannels::default(),
        )
        .unwrap(),
    );
    let executor = BlockExecutor::new(
        fx.state_store.clone(),
        fx.block_store.clone(),
        fresh_app.clone(),
        tx_pool,
        evidence_pool,
        EventBus::default(),
    );
    let genesis = GenesisDoc {
        genesis_time: GENESIS_TIME,
        chain_id: CHAIN_ID.into(),
        initial_height: 1,
        consensus_params: None,
        validators: fx
            .keypairs
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
    let stored_state = fx.state_store.load().unwrap().unwrap();
    let mut handshaker =
        Handshaker::new(fx.block_store.clone(), fx.state_store.clone(), genesis);
    let reconciled = handshaker
        .handshake(fresh_app.clone(), &executor, stored_state.clone())
        .unwrap();
    assert_eq!(handshaker.replayed_blocks(), 2);
    assert_eq!(reconciled, stored_state);
    // the fresh application caught up with all three delivered txs
    assert_eq!(fresh_app.delivered.load(Ordering::SeqCst), 3);
}

#[test]
fn first_block_must_not_carry_a_commit() {
    let fx = fixture(1);
    let proposer = fx.state.validators.validators[0].address;
    let mut last_commit = Commit::empty();
    last_commit
        .signatures
        .push(corten_models::vote::CommitSig::absent());
    let (block, parts) = fx
        .state
        .make_block(1, vec![], last_commit, Default::default(), proposer)
        .unwrap();
    let block_id = corten_models::block_id::BlockId {
        hash: block.hash(),
        part_set_header: parts.header(),
    };
    assert!(fx.executor.apply_block(&fx.state, block_id, &block).is_err());
}
