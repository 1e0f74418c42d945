use crate::tests::tools::{stub_tx, StubApp};
use crate::tx_pool::TxPool;
use corten_models::abci::ResponseDeliverTx;
use corten_pool_exports::{PoolChannels, PoolConfig, PoolError};
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn pool_with_config(config: PoolConfig) -> (Arc<StubApp>, TxPool) {
    let app = Arc::new(StubApp::new());
    let pool = TxPool::new(config, app.clone(), PoolChannels::default(), 1);
    (app, pool)
}

fn default_pool() -> (Arc<StubApp>, TxPool) {
    pool_with_config(PoolConfig {
        broadcast: false,
        recheck: false,
        ..Default::default()
    })
}

#[test]
fn admission_and_dedup() {
    let (_, pool) = default_pool();
    let tx = stub_tx(1, 0, 50);
    pool.check_tx(tx.clone()).unwrap();
    assert_eq!(pool.size(), 1);
    assert!(matches!(pool.check_tx(tx), Err(PoolError::TxAlreadyKnown)));
}

#[test]
fn oversized_tx_rejected() {
    let (_, pool) = pool_with_config(PoolConfig {
        max_tx_bytes: 2,
        broadcast: false,
        ..Default::default()
    });
    assert!(matches!(
        pool.check_tx(stub_tx(1, 0, 1)),
        Err(PoolError::TxTooBig(3, 2))
    ));
}

#[test]
fn nonce_override_requires_gas_bump() {
    let (_, pool) = pool_with_config(PoolConfig {
        gas_price_bump: 10,
        broadcast: false,
        recheck: false,
        ..Default::default()
    });
    pool.check_tx(stub_tx(1, 5, 50)).unwrap();

    // same (sender, nonce) with an insufficient bump is refused
    assert!(matches!(
        pool.check_tx(stub_tx(1, 5, 55)),
        Err(PoolError::NonceOverrideRejected)
    ));
    assert_eq!(pool.size(), 1);

    // a sufficient bump evicts the incumbent
    pool.check_tx(stub_tx(1, 5, 60)).unwrap();
    assert_eq!(pool.size(), 1);
    let reaped = pool.reap_max_bytes_max_gas(1024, 1024);
    assert_eq!(reaped, vec![stub_tx(1, 5, 60)]);
}

#[test]
fn reap_orders_by_gas_and_respects_caps() {
    let (_, pool) = default_pool();
    pool.check_tx(stub_tx(1, 0, 10)).unwrap();
    pool.check_tx(stub_tx(2, 0, 90)).unwrap();
    pool.check_tx(stub_tx(3, 0, 40)).unwrap();

    let reaped = pool.reap_max_bytes_max_gas(1024, 1024);
    assert_eq!(
        reaped,
        vec![stub_tx(2, 0, 90), stub_tx(3, 0, 40), stub_tx(1, 0, 10)]
    );

    // a gas cap of 60 skips the 90-gas tx but keeps scanning
    let reaped = pool.reap_max_bytes_max_gas(1024, 60);
    assert_eq!(reaped, vec![stub_tx(3, 0, 40), stub_tx(1, 0, 10)]);

    // unlimited gas, tight bytes: stops once bytes run out
    let reaped = pool.reap_max_bytes_max_gas(3, -1);
    assert_eq!(reaped, vec![stub_tx(2, 0, 90)]);

    // reap_max_txs returns arrival order
    let reaped = pool.reap_max_txs(2);
    assert_eq!(reaped, vec![stub_tx(1, 0, 10), stub_tx(2, 0, 90)]);
}

#[test]
fn equal_gas_keeps_arrival_order() {
    let (_, pool) = default_pool();
    pool.check_tx(stub_tx(1, 0, 50)).unwrap();
    pool.check_tx(stub_tx(2, 0, 50)).unwrap();
    pool.check_tx(stub_tx(3, 0, 50)).unwrap();
    let reaped = pool.reap_max_bytes_max_gas(1024, 1024);
    assert_eq!(
        reaped,
        vec![stub_tx(1, 0, 50), stub_tx(2, 0, 50), stub_tx(3, 0, 50)]
    );
}

#[test]
fn update_removes_committed_and_expires_by_height() {
    let (_, pool) = pool_with_config(PoolConfig {
        ttl_num_blocks: 2,
        broadcast: false,
        recheck: false,
        ..Default::default()
    });
    let committed = stub_tx(1, 0, 10);
    pool.check_tx(committed.clone()).unwrap();
    pool.check_tx(stub_tx(2, 0, 10)).unwrap();
    assert_eq!(pool.size(), 2);

    // commit the first tx at height 2: it leaves the pool
    pool.update(
        2,
        &[committed],
        &[ResponseDeliverTx::default()],
        None,
        None,
    )
    .unwrap();
    assert_eq!(pool.size(), 1);

    // the survivor was admitted at height 1; at height 4 its TTL lapses
    pool.update(4, &[], &[], None, None).unwrap();
    assert_eq!(pool.size(), 0);
}

#[test]
fn recheck_drops_newly_invalid_txs() {
    let (app, pool) = pool_with_config(PoolConfig {
        broadcast: false,
        recheck: true,
        ..Default::default()
    });
    pool.check_tx(stub_tx(1, 0, 10)).unwrap();
    pool.check_tx(stub_tx(2, 0, 10)).unwrap();
    app.reject_all.store(true, Ordering::Relaxed);
    pool.update(2, &[], &[], None, None).unwrap();
    assert_eq!(pool.size(), 0);
}

#[test]
fn pool_capacity_enforced() {
    let (_, pool) = pool_with_config(PoolConfig {
        max_tx_num: 2,
        broadcast: false,
        recheck: false,
        ..Default::default()
    });
    pool.check_tx(stub_tx(1, 0, 10)).unwrap();
    pool.check_tx(stub_tx(2, 0, 10)).unwrap();
    assert!(matches!(
        pool.check_tx(stub_tx(3, 0, 10)),
        Err(PoolError::PoolFull)
    ));
}
