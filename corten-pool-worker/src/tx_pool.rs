//! The pending-transaction pool.

use crate::types::{TxCache, TxQueue, WrappedTx};
use corten_execution_exports::Application;
use corten_hash::Hash;
use corten_logging::corten_trace;
use corten_models::abci::{CheckTxKind, ResponseCheckTx, ResponseDeliverTx, CODE_TYPE_OK};
use corten_models::block::Tx;
use corten_models::Height;
use corten_pool_exports::{
    PoolChannels, PoolConfig, PoolError, PoolResult, PostcheckFn, PrecheckFn, TxPoolController,
};
use corten_time::Timestamp;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Gas/nonce-ordered pending-transaction buffer with precheck/postcheck
/// hooks, TTL eviction, and nonce override.
pub struct TxPool {
    config: PoolConfig,
    app: Arc<dyn Application>,
    channels: PoolChannels,
    inner: Mutex<Inner>,
}

struct Inner {
    queue: TxQueue,
    cache: TxCache,
    height: Height,
    precheck: Option<PrecheckFn>,
    postcheck: Option<PostcheckFn>,
}

impl TxPool {
    /// Create a pool at `height`.
    pub fn new(
        config: PoolConfig,
        app: Arc<dyn Application>,
        channels: PoolChannels,
        height: Height,
    ) -> Self {
        let cache = TxCache::new(config.cache_size);
        TxPool {
            config,
            app,
            channels,
            inner: Mutex::new(Inner {
                queue: TxQueue::default(),
                cache,
                height,
                precheck: None,
                postcheck: None,
            }),
        }
    }

    /// Install the synchronous admission filter.
    pub fn set_precheck(&self, precheck: Option<PrecheckFn>) {
        self.inner.lock().precheck = precheck;
    }

    /// Install the response filter.
    pub fn set_postcheck(&self, postcheck: Option<PostcheckFn>) {
        self.inner.lock().postcheck = postcheck;
    }

    /// Admission pipeline: size check, precheck, dedup, application
    /// `check_tx`, nonce override, insert, broadcast.
    pub fn check_tx(&self, tx: Tx) -> PoolResult<ResponseCheckTx> {
        let tx_hash = tx.hash();
        {
            let mut inner = self.inner.lock();
            if tx.size() > self.config.max_tx_bytes {
                return Err(PoolError::TxTooBig(tx.size(), self.config.max_tx_bytes));
            }
            if let Some(precheck) = &inner.precheck {
                if !precheck(&tx) {
                    return Err(PoolError::PrecheckFailed);
                }
            }
            if inner.queue.has(&tx_hash) || !inner.cache.put(tx_hash) {
                return Err(PoolError::TxAlreadyKnown);
            }
        }

        // The application call happens outside the lock; admission below
        // re-checks the queue state.
        let response = self.app.check_tx(&tx, CheckTxKind::New);
        self.add_tx(tx_hash, tx, response)
    }

    fn add_tx(
        &self,
        tx_hash: Hash,
        tx: Tx,
        response: ResponseCheckTx,
    ) -> PoolResult<ResponseCheckTx> {
        let mut inner = self.inner.lock();
        if let Some(postcheck) = inner.postcheck.clone() {
            if !postcheck(&tx, &response) {
                if !self.config.keep_invalid_txs_in_cache {
                    inner.cache.remove(&tx_hash);
                }
                return Err(PoolError::TxRejected(response.code, "postcheck".into()));
            }
        }
        if response.code != CODE_TYPE_OK || !response.mempool_error.is_empty() {
            if !self.config.keep_invalid_txs_in_cache {
                inner.cache.remove(&tx_hash);
            }
            return Err(PoolError::TxRejected(
                response.code,
                response.mempool_error.clone(),
            ));
        }

        // Nonce override: a replacement must outbid the incumbent.
        let incumbent = inner
            .queue
            .get_by_sender(&response.sender, response.nonce)
            .map(|old| (old.hash, old.gas_wanted));
        if let Some((old_hash, old_gas)) = incumbent {
            if response.gas_wanted < old_gas + self.config.gas_price_bump as i64 {
                if !self.config.keep_invalid_txs_in_cache {
                    inner.cache.remove(&tx_hash);
                }
                return Err(PoolError::NonceOverrideRejected);
            }
            inner.queue.remove(&old_hash);
        }

        if inner.queue.len() >= self.config.max_tx_num {
            if !self.config.keep_invalid_txs_in_cache {
                inner.cache.remove(&tx_hash);
            }
            return Err(PoolError::PoolFull);
        }

        let sequence = inner.queue.next_sequence();
        let wtx = WrappedTx {
            hash: tx_hash,
            sender: response.sender.clone(),
            nonce: response.nonce,
            gas_wanted: response.gas_wanted,
            priority: response.priority,
            height: inner.height,
            time: Timestamp::now().unwrap_or(Timestamp::ZERO),
            sequence,
            tx: tx.clone(),
        };
        inner.queue.insert(wtx);
        drop(inner);

        if self.config.broadcast {
            if let Some(broadcast) = &self.channels.broadcast_tx {
                let _ = broadcast.try_send(tx);
            }
        }
        corten_trace!("pool.tx_accepted", hash = %tx_hash);
        Ok(response)
    }

    /// Collect transactions for a proposal: descend by gas, admit entries
    /// fitting under both caps. Entries too gas-heavy are skipped, not
    /// stopping the scan; the byte cap stops it.
    pub fn reap_max_bytes_max_gas(&self, max_bytes: i64, max_gas: i64) -> Vec<Tx> {
        let inner = self.inner.lock();
        let mut txs = Vec::new();
        let mut bytes: i64 = 0;
        let mut gas: i64 = 0;
        for wtx in inner.queue.iter_by_gas_desc() {
            if max_gas >= 0 && gas + wtx.gas_wanted > max_gas {
                continue;
            }
            if bytes + wtx.tx.size() as i64 > max_bytes {
                break;
            }
            bytes += wtx.tx.size() as i64;
            gas += wtx.gas_wanted;
            txs.push(wtx.tx.clone());
        }
        txs
    }

    /// Collect up to `count` transactions in arrival order.
    pub fn reap_max_txs(&self, count: usize) -> Vec<Tx> {
        let inner = self.inner.lock();
        inner
            .queue
            .iter_arrival()
            .into_iter()
            .take(count)
            .map(|wtx| wtx.tx)
            .collect()
    }

    /// Post-commit maintenance: drop committed transactions, expire by TTL,
    /// and optionally resubmit the remainder as rechecks.
    pub fn update(
        &self,
        height: Height,
        committed_txs: &[Tx],
        responses: &[ResponseDeliverTx],
        precheck: Option<PrecheckFn>,
        postcheck: Option<PostcheckFn>,
    ) -> PoolResult<()> {
        let recheck_txs = {
            let mut inner = self.inner.lock();
            inner.height = height;
            if precheck.is_some() {
                inner.precheck = precheck;
            }
            if postcheck.is_some() {
                inner.postcheck = postcheck;
            }

            for (index, tx) in committed_txs.iter().enumerate() {
                let tx_hash = tx.hash();
                let committed_ok = responses
                    .get(index)
                    .map(|response| response.code == CODE_TYPE_OK)
                    .unwrap_or(false);
                if committed_ok {
                    inner.cache.put(tx_hash);
                } else if !self.config.keep_invalid_txs_in_cache {
                    inner.cache.remove(&tx_hash);
                }
                inner.queue.remove(&tx_hash);
            }

            if self.config.ttl_num_blocks > 0 {
                let expired_height = height.saturating_sub(self.config.ttl_num_blocks as Height);
                for tx_hash in inner.queue.expired_by_height(expired_height) {
                    inner.queue.remove(&tx_hash);
                }
            }
            if self.config.ttl_duration > Timestamp::ZERO {
                let now = Timestamp::now().unwrap_or(Timestamp::ZERO);
                let expired_time = now.saturating_sub(self.config.ttl_duration);
                for tx_hash in inner.queue.expired_by_time(expired_time) {
                    inner.queue.remove(&tx_hash);
                }
            }

            if self.config.recheck {
                inner.queue.iter_arrival()
            } else {
                Vec::new()
            }
        };

        for wtx in recheck_txs {
            let response = self.app.check_tx(&wtx.tx, CheckTxKind::Recheck);
            if response.code != CODE_TYPE_OK {
                let mut inner = self.inner.lock();
                inner.queue.remove(&wtx.hash);
                if !self.config.keep_invalid_txs_in_cache {
                    inner.cache.remove(&wtx.hash);
                }
                debug!(hash = %wtx.hash, code = response.code, "dropped tx on recheck");
            }
        }
        Ok(())
    }

    /// Number of pooled transactions.
    pub fn size(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Total pooled bytes.
    pub fn size_bytes(&self) -> u64 {
        self.inner.lock().queue.bytes()
    }

    /// True when nothing is pooled.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    /// Drop every entry and forget seen hashes.
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        inner.queue.clear();
        inner.cache.reset();
    }
}

impl TxPoolController for TxPool {
    fn check_tx(&self, tx: Tx) -> PoolResult<ResponseCheckTx> {
        TxPool::check_tx(self, tx)
    }

    fn reap_max_bytes_max_gas(&self, max_bytes: i64, max_gas: i64) -> Vec<Tx> {
        TxPool::reap_max_bytes_max_gas(self, max_bytes, max_gas)
    }

    fn reap_max_txs(&self, count: usize) -> Vec<Tx> {
        TxPool::reap_max_txs(self, count)
    }

    fn update(
        &self,
        height: Height,
        committed_txs: &[Tx],
        responses: &[ResponseDeliverTx],
        precheck: Option<PrecheckFn>,
        postcheck: Option<PostcheckFn>,
    ) -> PoolResult<()> {
        TxPool::update(self, height, committed_txs, responses, precheck, postcheck)
    }

    fn size(&self) -> usize {
        TxPool::size(self)
    }

    fn size_bytes(&self) -> u64 {
        TxPool::size_bytes(self)
    }
}
