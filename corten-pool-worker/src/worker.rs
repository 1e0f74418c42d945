//! The pool worker task: consumes transactions and evidence arriving from
//! the gossip layer and routes them into the two pools.

use crate::evidence_pool::EvidencePool;
use crate::tx_pool::TxPool;
use corten_models::block::Tx;
use corten_models::evidence::Evidence;
use corten_pool_exports::{EvidencePoolController, PoolError, TxPoolController};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handle used to stop the pool worker.
pub struct PoolManager {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl PoolManager {
    /// Signal the worker to stop and wait for it.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(()).await;
        let _ = self.handle.await;
        info!("pool worker stopped");
    }
}

/// Spawn the pool worker: transactions and evidence received from peers are
/// admitted asynchronously; proposers and the executor use the returned
/// controllers directly.
pub fn start_pool_worker(
    tx_pool: Arc<TxPool>,
    evidence_pool: Arc<EvidencePool>,
    mut tx_rx: mpsc::Receiver<Tx>,
    mut evidence_rx: mpsc::Receiver<Evidence>,
) -> (
    Arc<dyn TxPoolController>,
    Arc<dyn EvidencePoolController>,
    PoolManager,
) {
    let (stop_tx, mut stop_rx) = mpsc::channel(1);
    let worker_tx_pool = tx_pool.clone();
    let worker_evidence_pool = evidence_pool.clone();
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop_rx.recv() => break,
                tx = tx_rx.recv() => match tx {
                    None => break,
                    Some(tx) => match worker_tx_pool.check_tx(tx) {
                        Ok(_) => {}
                        Err(PoolError::TxAlreadyKnown) => {}
                        Err(err) => debug!("rejected gossiped tx: {}", err),
                    },
                },
                evidence = evidence_rx.recv() => match evidence {
                    None => break,
                    Some(evidence) => {
                        if let Err(err) = worker_evidence_pool.add_evidence(evidence) {
                            warn!("rejected gossiped evidence: {}", err);
                        }
                    }
                },
            }
        }
    });
    (
        tx_pool,
        evidence_pool,
        PoolManager { stop_tx, handle },
    )
}
