//! Internal bookkeeping types of the transaction pool.

use corten_hash::Hash;
use corten_models::block::Tx;
use corten_models::Height;
use corten_time::Timestamp;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// A pooled transaction with its admission metadata.
#[derive(Debug, Clone)]
pub struct WrappedTx {
    /// The raw transaction.
    pub tx: Tx,
    /// Transaction hash, the primary key.
    pub hash: Hash,
    /// Spending account, as reported by the application.
    pub sender: String,
    /// Account nonce, as reported by the application.
    pub nonce: u64,
    /// Gas the transaction asks for; the reap order.
    pub gas_wanted: i64,
    /// Application-assigned priority, carried but not ordering.
    pub priority: i64,
    /// Height at admission, for block-count TTL.
    pub height: Height,
    /// Time at admission, for wall-clock TTL.
    pub time: Timestamp,
    /// Admission sequence; arrival order among equal-gas entries.
    pub sequence: u64,
}

/// The multi-indexed pending-transaction queue: by hash (primary), by
/// (sender, nonce) for overrides, by gas descending for the proposer, and by
/// admission height/time for TTL eviction.
#[derive(Default)]
pub struct TxQueue {
    txs: HashMap<Hash, WrappedTx>,
    by_sender: HashMap<(String, u64), Hash>,
    by_gas: BTreeSet<(i64, Reverse<u64>, Hash)>,
    by_height: BTreeSet<(Height, Hash)>,
    by_time: BTreeSet<(Timestamp, Hash)>,
    bytes: u64,
    next_sequence: u64,
}

impl TxQueue {
    /// Number of pooled transactions.
    pub fn len(&self) -> usize {
        self.txs.len()
    }

    /// True when nothing is pooled.
    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    /// Total pooled bytes.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Next admission sequence number.
    pub fn next_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    /// True when `hash` is pooled.
    pub fn has(&self, hash: &Hash) -> bool {
        self.txs.contains_key(hash)
    }

    /// Look up by primary key.
    pub fn get(&self, hash: &Hash) -> Option<&WrappedTx> {
        self.txs.get(hash)
    }

    /// Look up the entry of a (sender, nonce) pair.
    pub fn get_by_sender(&self, sender: &str, nonce: u64) -> Option<&WrappedTx> {
        self.by_sender
            .get(&(sender.to_string(), nonce))
            .and_then(|hash| self.txs.get(hash))
    }

    /// Insert an entry. The caller has already resolved (sender, nonce)
    /// conflicts.
    pub fn insert(&mut self, wtx: WrappedTx) {
        self.by_sender
            .insert((wtx.sender.clone(), wtx.nonce), wtx.hash);
        self.by_gas
            .insert((wtx.gas_wanted, Reverse(wtx.sequence), wtx.hash));
        self.by_height.insert((wtx.height, wtx.hash));
        self.by_time.insert((wtx.time, wtx.hash));
        self.bytes += wtx.tx.size() as u64;
        self.txs.insert(wtx.hash, wtx);
    }

    /// Remove an entry by primary key.
    pub fn remove(&mut self, hash: &Hash) -> Option<WrappedTx> {
        let wtx = self.txs.remove(hash)?;
        self.by_sender.remove(&(wtx.sender.clone(), wtx.nonce));
        self.by_gas
            .remove(&(wtx.gas_wanted, Reverse(wtx.sequence), wtx.hash));
        self.by_height.remove(&(wtx.height, wtx.hash));
        self.by_time.remove(&(wtx.time, wtx.hash));
        self.bytes -= wtx.tx.size() as u64;
        Some(wtx)
    }

    /// Iterate entries by gas descending, arrival ascending among equals.
    pub fn iter_by_gas_desc(&self) -> impl Iterator<Item = &WrappedTx> {
        self.by_gas
            .iter()
            .rev()
            .filter_map(|(_, _, hash)| self.txs.get(hash))
    }

    /// Hashes admitted strictly below `height`.
    pub fn expired_by_height(&self, height: Height) -> Vec<Hash> {
        self.by_height
            .iter()
            .take_while(|(entry_height, _)| *entry_height < height)
            .map(|(_, hash)| *hash)
            .collect()
    }

    /// Hashes admitted strictly before `time`.
    pub fn expired_by_time(&self, time: Timestamp) -> Vec<Hash> {
        self.by_time
            .iter()
            .take_while(|(entry_time, _)| *entry_time < time)
            .map(|(_, hash)| *hash)
            .collect()
    }

    /// All entries in arrival order.
    pub fn iter_arrival(&self) -> Vec<WrappedTx> {
        let mut entries: Vec<WrappedTx> = self.txs.values().cloned().collect();
        entries.sort_by_key(|wtx| wtx.sequence);
        entries
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        *self = TxQueue::default();
    }
}

/// Bounded set of recently seen transaction hashes. When the capacity is
/// reached the oldest entries are evicted; exact LRU precision is not needed
/// for a gossip dedup filter.
#[derive(Debug)]
pub struct TxCache {
    capacity: usize,
    set: HashSet<Hash>,
    order: VecDeque<Hash>,
}

impl TxCache {
    /// Create a cache holding at most `capacity` hashes.
    pub fn new(capacity: usize) -> Self {
        TxCache {
            capacity: capacity.max(1),
            set: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Record a hash, evicting the oldest entries when full. Returns false
    /// when the hash was already present.
    pub fn put(&mut self, hash: Hash) -> bool {
        if !self.set.insert(hash) {
            return false;
        }
        self.order.push_back(hash);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }
        true
    }

    /// True when `hash` was seen recently.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.set.contains(hash)
    }

    /// Forget one hash.
    pub fn remove(&mut self, hash: &Hash) {
        if self.set.remove(hash) {
            self.order.retain(|entry| entry != hash);
        }
    }

    /// Forget everything.
    pub fn reset(&mut self) {
        self.set.clear();
        self.order.clear();
    }
}
