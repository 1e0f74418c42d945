use displaydoc::Display;
use std::collections::BTreeMap;
use thiserror::Error;

/// Raw key bytes.
pub type Key = Vec<u8>;
/// Raw value bytes.
pub type Value = Vec<u8>;

/// Batched writes: `Some(value)` puts, `None` deletes. The map form makes
/// batches idempotent and naturally last-write-wins.
pub type DbBatch = BTreeMap<Key, Option<Value>>;

/// Errors surfaced by a database backend. Storage failures are fatal to the
/// engine, so these propagate unwrapped to the node supervisor.
#[non_exhaustive]
#[derive(Display, Error, Debug, Clone)]
pub enum DbError {
    /// backend error: {0}
    Backend(String),
    /// corrupted stored value under key {0:?}
    Corruption(Vec<u8>),
}

/// Iteration start point.
pub enum IteratorMode<'a> {
    /// From the first key.
    Start,
    /// From the last key.
    End,
    /// From the given key in the given direction.
    From(&'a [u8], Direction),
}

/// Iteration direction.
pub enum Direction {
    /// Ascending key order.
    Forward,
    /// Descending key order.
    Reverse,
}

/// Ordered byte-keyed store with prefix scans and atomic batched writes.
pub trait DbController: Send + Sync {
    /// Point lookup.
    fn get(&self, key: &[u8]) -> Result<Option<Value>, DbError>;

    /// Apply a write batch atomically.
    fn write_batch(&self, batch: DbBatch) -> Result<(), DbError>;

    /// Iterate over `(key, value)` pairs from the given mode.
    fn iterator<'a>(
        &'a self,
        mode: IteratorMode<'_>,
    ) -> Box<dyn Iterator<Item = (Key, Value)> + 'a>;

    /// Iterate over all pairs whose key starts with `prefix`, ascending.
    fn prefix_iterator<'a>(
        &'a self,
        prefix: &[u8],
    ) -> Box<dyn Iterator<Item = (Key, Value)> + 'a>;

    /// Convenience single put.
    fn put(&self, key: Key, value: Value) -> Result<(), DbError> {
        let mut batch = DbBatch::new();
        batch.insert(key, Some(value));
        self.write_batch(batch)
    }

    /// Convenience single delete.
    fn delete(&self, key: Key) -> Result<(), DbError> {
        let mut batch = DbBatch::new();
        batch.insert(key, None);
        self.write_batch(batch)
    }

    /// True when `key` is present.
    fn contains(&self, key: &[u8]) -> Result<bool, DbError> {
        Ok(self.get(key)?.is_some())
    }
}
