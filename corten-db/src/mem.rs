use crate::controller::{DbBatch, DbController, DbError, Direction, IteratorMode, Key, Value};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// Ordered in-memory store. Iterators snapshot the map, so they stay valid
/// across concurrent writes.
#[derive(Default, Clone)]
pub struct MemDb {
    map: Arc<RwLock<BTreeMap<Key, Value>>>,
}

impl MemDb {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// True when no entry is stored.
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl DbController for MemDb {
    fn get(&self, key: &[u8]) -> Result<Option<Value>, DbError> {
        Ok(self.map.read().get(key).cloned())
    }

    fn write_batch(&self, batch: DbBatch) -> Result<(), DbError> {
        let mut map = self.map.write();
        for (key, value) in batch {
            match value {
                Some(value) => {
                    map.insert(key, value);
                }
                None => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn iterator<'a>(
        &'a self,
        mode: IteratorMode<'_>,
    ) -> Box<dyn Iterator<Item = (Key, Value)> + 'a> {
        let map = self.map.read();
        let pairs: Vec<(Key, Value)> = match mode {
            IteratorMode::Start => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            IteratorMode::End => map
                .iter()
                .rev()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            IteratorMode::From(key, Direction::Forward) => map
                .range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            IteratorMode::From(key, Direction::Reverse) => map
                .range::<[u8], _>((Bound::Unbounded, Bound::Included(key)))
                .rev()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        Box::new(pairs.into_iter())
    }

    fn prefix_iterator<'a>(
        &'a self,
        prefix: &[u8],
    ) -> Box<dyn Iterator<Item = (Key, Value)> + 'a> {
        let map = self.map.read();
        let prefix = prefix.to_vec();
        let pairs: Vec<(Key, Value)> = map
            .range::<[u8], _>((Bound::Included(prefix.as_slice()), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Box::new(pairs.into_iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_put_delete() {
        let db = MemDb::new();
        let mut batch = DbBatch::new();
        batch.insert(vec![1], Some(vec![10]));
        batch.insert(vec![2], Some(vec![20]));
        db.write_batch(batch).unwrap();
        assert_eq!(db.get(&[1]).unwrap(), Some(vec![10]));

        let mut batch = DbBatch::new();
        batch.insert(vec![1], None);
        db.write_batch(batch).unwrap();
        assert_eq!(db.get(&[1]).unwrap(), None);
        assert!(db.contains(&[2]).unwrap());
    }

    #[test]
    fn prefix_scan_is_bounded() {
        let db = MemDb::new();
        db.put(vec![0x00, 1], vec![1]).unwrap();
        db.put(vec![0x01, 1], vec![2]).unwrap();
        db.put(vec![0x01, 2], vec![3]).unwrap();
        db.put(vec![0x02, 0], vec![4]).unwrap();
        let keys: Vec<_> = db.prefix_iterator(&[0x01]).map(|(k, _)| k).collect();
        assert_eq!(keys, vec![vec![0x01, 1], vec![0x01, 2]]);
    }

    #[test]
    fn reverse_iteration() {
        let db = MemDb::new();
        for i in 0u8..5 {
            db.put(vec![i], vec![i]).unwrap();
        }
        let first_back: Vec<_> = db
            .iterator(IteratorMode::From(&[3], Direction::Reverse))
            .map(|(k, _)| k)
            .collect();
        assert_eq!(first_back, vec![vec![3], vec![2], vec![1], vec![0]]);
    }
}
