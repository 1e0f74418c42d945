use corten_time::Timestamp;
use serde::{Deserialize, Serialize};

/// Pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Maximum number of transactions the pool holds.
    pub max_tx_num: usize,
    /// Maximum size of one transaction in bytes.
    pub max_tx_bytes: usize,
    /// Time after which an unconfirmed transaction expires; zero disables.
    pub ttl_duration: Timestamp,
    /// Height distance after which an unconfirmed transaction expires; zero
    /// disables.
    pub ttl_num_blocks: u64,
    /// Minimum gas increase required to replace a (sender, nonce) entry.
    pub gas_price_bump: u64,
    /// Keep transactions rejected by the application in the seen-cache so
    /// they are not re-checked on every gossip.
    pub keep_invalid_txs_in_cache: bool,
    /// Re-run `check_tx` on every remaining entry after a block commits.
    pub recheck: bool,
    /// Forward admitted transactions to the gossip layer.
    pub broadcast: bool,
    /// Capacity of the seen-transaction cache.
    pub cache_size: usize,
    /// Maximum number of pending evidence items returned to one proposal.
    pub max_pending_evidence: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_tx_num: 10_000,
            max_tx_bytes: 1024 * 1024,
            ttl_duration: Timestamp::ZERO,
            ttl_num_blocks: 0,
            gas_price_bump: 1_000,
            keep_invalid_txs_in_cache: false,
            recheck: true,
            broadcast: true,
            cache_size: 10_000,
            max_pending_evidence: 1_000,
        }
    }
}
