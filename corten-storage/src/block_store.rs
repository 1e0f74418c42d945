//! Low-level store for committed blocks. Three kinds of information are
//! kept per height: the block meta, the block parts, and the commit; plus
//! the latest "seen" commit and a hash → height reverse index. The store
//! always contains the contiguous range [base, height].

use crate::error::{StoreError, StoreResult};
use crate::keys;
use corten_db::{DbBatch, DbController, IteratorMode};
use corten_hash::Hash;
use corten_models::block::{Block, BlockMeta, BlockMetaDeserializer, BlockMetaSerializer};
use corten_models::part_set::{Part, PartDeserializer, PartSerializer, PartSet};
use corten_models::vote::{Commit, CommitDeserializer, CommitSerializer};
use corten_models::Height;
use corten_serialization::{DeserializeError, Deserializer, Serializer};
use std::sync::Arc;
use tracing::debug;

/// Block persistence over a [`DbController`].
#[derive(Clone)]
pub struct BlockStore {
    db: Arc<dyn DbController>,
}

impl BlockStore {
    /// Open a block store over `db`.
    pub fn new(db: Arc<dyn DbController>) -> Self {
        BlockStore { db }
    }

    /// First stored height, or 0 for an empty store.
    pub fn base(&self) -> StoreResult<Height> {
        let mut iter = self.db.prefix_iterator(&[keys::PREFIX_BLOCK_META]);
        match iter.next() {
            Some((key, _)) => keys::decode_height_key(&key)
                .ok_or_else(|| StoreError::Corruption("block meta key".into())),
            None => Ok(0),
        }
    }

    /// Last stored height, or 0 for an empty store.
    pub fn height(&self) -> StoreResult<Height> {
        // scan back from just past the meta prefix
        let upper = [keys::PREFIX_BLOCK_META + 1];
        let mut iter = self
            .db
            .iterator(IteratorMode::From(&upper, corten_db::Direction::Reverse));
        match iter.find(|(key, _)| key.first() == Some(&keys::PREFIX_BLOCK_META)) {
            Some((key, _)) => keys::decode_height_key(&key)
                .ok_or_else(|| StoreError::Corruption("block meta key".into())),
            None => Ok(0),
        }
    }

    /// Number of stored blocks.
    pub fn size(&self) -> StoreResult<Height> {
        let height = self.height()?;
        if height == 0 {
            return Ok(0);
        }
        Ok(height + 1 - self.base()?)
    }

    /// Persist a complete block: meta, every part, the embedded commit for
    /// height − 1, the seen commit for this height, and the hash index.
    pub fn save_block(
        &self,
        block: &Block,
        parts: &PartSet,
        seen_commit: &Commit,
    ) -> StoreResult<()> {
        if !parts.is_complete() {
            return Err(StoreError::Inconsistency(
                "cannot save a block with an incomplete part set".into(),
            ));
        }
        let height = block.header.height;
        let meta = BlockMeta::from_block(block, parts)?;

        let mut batch = DbBatch::new();
        batch.insert(
            keys::height_key(keys::PREFIX_BLOCK_META, height),
            Some(BlockMetaSerializer::new().serialize_to_vec(&meta)?),
        );
        let part_serializer = PartSerializer::new();
        for index in 0..parts.total() {
            let part = parts.get_part(index as usize).ok_or_else(|| {
                StoreError::Inconsistency(format!("missing part {} while saving", index))
            })?;
            batch.insert(
                keys::part_key(height, index),
                Some(part_serializer.serialize_to_vec(part)?),
            );
        }
        let commit_serializer = CommitSerializer::new();
        batch.insert(
            keys::height_key(keys::PREFIX_BLOCK_COMMIT, height - 1),
            Some(commit_serializer.serialize_to_vec(&block.last_commit)?),
        );
        batch.insert(
            keys::seen_commit_key(),
            Some(commit_serializer.serialize_to_vec(seen_commit)?),
        );
        batch.insert(
            keys::hash_key(&meta.block_id.hash),
            Some((height as u64).to_be_bytes().to_vec()),
        );
        self.db.write_batch(batch)?;
        debug!(height, "saved block");
        Ok(())
    }

    /// Load the meta of `height`, if stored.
    pub fn load_block_meta(&self, height: Height) -> StoreResult<Option<BlockMeta>> {
        let raw = self
            .db
            .get(&keys::height_key(keys::PREFIX_BLOCK_META, height))?;
        match raw {
            None => Ok(None),
            Some(raw) => {
                let (_, meta) = BlockMetaDeserializer::new()
                    .deserialize::<DeserializeError>(&raw)
                    .map_err(|_| StoreError::Corruption(format!("block meta {}", height)))?;
                Ok(Some(meta))
            }
        }
    }

    /// Load one part.
    pub fn load_block_part(&self, height: Height, index: u32) -> StoreResult<Option<Part>> {
        let raw = self.db.get(&keys::part_key(height, index))?;
        match raw {
            None => Ok(None),
            Some(raw) => {
                let (_, part) = PartDeserializer::new()
                    .deserialize::<DeserializeError>(&raw)
                    .map_err(|_| {
                        StoreError::Corruption(format!("block part {}/{}", height, index))
                    })?;
                Ok(Some(part))
            }
        }
    }

    /// Load and reassemble the full block at `height`.
    pub fn load_block(&self, height: Height) -> StoreResult<Option<Block>> {
        let meta = match self.load_block_meta(height)? {
            Some(meta) => meta,
            None => return Ok(None),
        };
        let mut data = Vec::with_capacity(meta.block_size as usize);
        for index in 0..meta.block_id.part_set_header.total {
            // a missing part means the block is gone (pruned underneath us)
            match self.load_block_part(height, index)? {
                Some(part) => data.extend_from_slice(&part.bytes),
                None => return Ok(None),
            }
        }
        let block = Block::from_bytes(&data)?;
        Ok(Some(block))
    }

    /// Load a block through the hash index.
    pub fn load_block_by_hash(&self, hash: &Hash) -> StoreResult<Option<Block>> {
        let raw = self.db.get(&keys::hash_key(hash))?;
        match raw {
            None => Ok(None),
            Some(raw) => {
                let bytes: [u8; 8] = raw
                    .as_slice()
                    .try_into()
                    .map_err(|_| StoreError::Corruption("hash index".into()))?;
                self.load_block(u64::from_be_bytes(bytes) as Height)
            }
        }
    }

    /// Load the commit sealed into the block after `height`.
    pub fn load_block_commit(&self, height: Height) -> StoreResult<Option<Commit>> {
        let raw = self
            .db
            .get(&keys::height_key(keys::PREFIX_BLOCK_COMMIT, height))?;
        match raw {
            None => Ok(None),
            Some(raw) => {
                let (_, commit) = CommitDeserializer::new(u16::MAX as u64)
                    .deserialize::<DeserializeError>(&raw)
                    .map_err(|_| StoreError::Corruption(format!("commit {}", height)))?;
                Ok(Some(commit))
            }
        }
    }

    /// Load the latest locally observed commit.
    pub fn load_seen_commit(&self) -> StoreResult<Option<Commit>> {
        let raw = self.db.get(&keys::seen_commit_key())?;
        match raw {
            None => Ok(None),
            Some(raw) => {
                let (_, commit) = CommitDeserializer::new(u16::MAX as u64)
                    .deserialize::<DeserializeError>(&raw)
                    .map_err(|_| StoreError::Corruption("seen commit".into()))?;
                Ok(Some(commit))
            }
        }
    }

    /// Drop every block below `retain_height`, returning the number pruned.
    /// The base moves up to `retain_height`.
    pub fn prune_blocks(&self, retain_height: Height) -> StoreResult<u64> {
        let base = self.base()?;
        let height = self.height()?;
        if retain_height <= base || base == 0 {
            return Ok(0);
        }
        if retain_height > height {
            return Err(StoreError::Inconsistency(format!(
                "cannot prune beyond the stored height {}",
                height
            )));
        }
        let mut batch = DbBatch::new();
        let mut pruned = 0u64;
        for target in base..retain_height {
            let meta = match self.load_block_meta(target)? {
                Some(meta) => meta,
                None => continue,
            };
            batch.insert(keys::height_key(keys::PREFIX_BLOCK_META, target), None);
            for index in 0..meta.block_id.part_set_header.total {
                batch.insert(keys::part_key(target, index), None);
            }
            batch.insert(keys::height_key(keys::PREFIX_BLOCK_COMMIT, target), None);
            batch.insert(keys::hash_key(&meta.block_id.hash), None);
            pruned += 1;
        }
        self.db.write_batch(batch)?;
        debug!(pruned, retain_height, "pruned block store");
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corten_db::MemDb;
    use corten_models::address::Address;
    use corten_models::block::{BlockHeader, Data, Tx, Version};
    use corten_models::block_id::BlockId;
    use corten_models::evidence::EvidenceList;
    use corten_time::Timestamp;

    fn sample_block(height: Height) -> Block {
        let data = Data {
            txs: vec![Tx(vec![height as u8; 10])],
        };
        let evidence = EvidenceList::default();
        let mut last_commit = Commit::empty();
        if height > 1 {
            last_commit.height = height - 1;
        }
        let header = BlockHeader {
            version: Version { block: 11, app: 0 },
            chain_id: "store-test".into(),
            height,
            time: Timestamp::from_millis(height as u64),
            last_block_id: BlockId::ZERO,
            last_commit_hash: last_commit.hash(),
            data_hash: data.hash(),
            validators_hash: Hash::compute_from(b"vals"),
            next_validators_hash: Hash::compute_from(b"next"),
            consensus_hash: Hash::compute_from(b"params"),
            app_hash: vec![height as u8],
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

    fn store_with_blocks(range: std::ops::RangeInclusive<Height>) -> BlockStore {
        let store = BlockStore::new(Arc::new(MemDb::new()));
        for height in range {
            let block = sample_block(height);
            let parts = block.make_part_set().unwrap();
            let mut seen = Commit::empty();
            seen.height = height;
            store.save_block(&block, &parts, &seen).unwrap();
        }
        store
    }

    #[test]
    fn empty_store() {
        let store = BlockStore::new(Arc::new(MemDb::new()));
        assert_eq!(store.base().unwrap(), 0);
        assert_eq!(store.height().unwrap(), 0);
        assert_eq!(store.size().unwrap(), 0);
        assert!(store.load_block_meta(1).unwrap().is_none());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let store = store_with_blocks(1..=3);
        assert_eq!(store.base().unwrap(), 1);
        assert_eq!(store.height().unwrap(), 3);
        assert_eq!(store.size().unwrap(), 3);

        let block = store.load_block(2).unwrap().unwrap();
        assert_eq!(block.header.height, 2);
        assert_eq!(block, sample_block(2));

        let by_hash = store.load_block_by_hash(&block.hash()).unwrap().unwrap();
        assert_eq!(by_hash, block);

        // the commit for height 1 was embedded in block 2
        let commit = store.load_block_commit(1).unwrap().unwrap();
        assert_eq!(commit.height, 1);

        let seen = store.load_seen_commit().unwrap().unwrap();
        assert_eq!(seen.height, 3);
    }

    #[test]
    fn prune_moves_base() {
        let store = store_with_blocks(1..=100);
        let pruned = store.prune_blocks(50).unwrap();
        assert_eq!(pruned, 49);
        assert_eq!(store.base().unwrap(), 50);
        assert_eq!(store.height().unwrap(), 100);
        assert!(store.load_block_meta(49).unwrap().is_none());
        assert!(store.load_block_meta(50).unwrap().is_some());

        // pruning below the base is a no-op
        assert_eq!(store.prune_blocks(40).unwrap(), 0);
        // pruning past the head is refused
        assert!(store.prune_blocks(200).is_err());
    }
}
