//! Blocks: header, transaction data, evidence data, and the commit of the
//! previous height.

use crate::address::{Address, AddressDeserializer, AddressSerializer};
use crate::block_id::{BlockId, BlockIdDeserializer, BlockIdSerializer};
use crate::error::ModelsError;
use crate::evidence::{EvidenceList, EvidenceListDeserializer, EvidenceListSerializer};
use crate::part_set::{PartSet, PART_SIZE};
use crate::vote::{Commit, CommitDeserializer, CommitSerializer};
use crate::Height;
use corten_hash::{merkle, Hash, HashDeserializer, HashSerializer};
use corten_serialization::{
    Deserializer, I64VarIntDeserializer, I64VarIntSerializer, SerializeError, Serializer,
    U64VarIntDeserializer, U64VarIntSerializer, VecU8Deserializer, VecU8Serializer,
};
use corten_time::{Timestamp, TimestampDeserializer, TimestampSerializer};
use nom::{
    error::{context, ContextError, ParseError},
    multi::length_count,
    IResult,
};
use std::ops::Bound::Included;

/// Maximum chain id length.
pub const MAX_CHAIN_ID_LENGTH: usize = 50;
/// Maximum transaction count per block accepted on decode.
pub const MAX_TXS_PER_BLOCK: u64 = 1_000_000;

/// A raw application transaction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Tx(pub Vec<u8>);

impl Tx {
    /// Transaction hash, the mempool and indexing key.
    pub fn hash(&self) -> Hash {
        Hash::compute_from(&self.0)
    }

    /// Byte size.
    pub fn size(&self) -> usize {
        self.0.len()
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Transaction payload of a block.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Data {
    /// Transactions in execution order.
    pub txs: Vec<Tx>,
}

impl Data {
    /// Merkle root over the raw transactions.
    pub fn hash(&self) -> Hash {
        let leaves: Vec<&[u8]> = self.txs.iter().map(|tx| tx.as_bytes()).collect();
        merkle::hash_from_bytes_list(&leaves)
    }
}

/// Protocol version pair carried in every header.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Version {
    /// Block structure version.
    pub block: u64,
    /// Application version.
    pub app: u64,
}

/// Block header.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BlockHeader {
    /// Protocol versions.
    pub version: Version,
    /// Chain identifier.
    pub chain_id: String,
    /// Height of this block.
    pub height: Height,
    /// Block time (BFT time at heights past the first, genesis time at the
    /// first).
    pub time: Timestamp,
    /// Id of the previous block, zero at the initial height.
    pub last_block_id: BlockId,
    /// Merkle root of the last commit's signature slots.
    pub last_commit_hash: Hash,
    /// Merkle root of the transactions.
    pub data_hash: Hash,
    /// Hash of the validator set signing this height.
    pub validators_hash: Hash,
    /// Hash of the validator set of the next height.
    pub next_validators_hash: Hash,
    /// Hash of the consensus parameters.
    pub consensus_hash: Hash,
    /// Application state digest after the previous block.
    pub app_hash: Vec<u8>,
    /// Merkle root of the previous block's deliver-tx results.
    pub last_results_hash: Hash,
    /// Merkle root of this block's evidence.
    pub evidence_hash: Hash,
    /// Address of the proposer of this block.
    pub proposer_address: Address,
}

impl BlockHeader {
    /// Header hash: Merkle root over the canonical encodings of every field.
    pub fn hash(&self) -> Hash {
        let u64_serializer = U64VarIntSerializer::new();
        let block_id_serializer = BlockIdSerializer::new();
        let timestamp_serializer = TimestampSerializer::new();

        let mut version = Vec::new();
        let _ = u64_serializer.serialize(&self.version.block, &mut version);
        let _ = u64_serializer.serialize(&self.version.app, &mut version);
        let mut height = Vec::new();
        let _ = u64_serializer.serialize(&(self.height as u64), &mut height);
        let mut time = Vec::new();
        let _ = timestamp_serializer.serialize(&self.time, &mut time);
        let mut last_block_id = Vec::new();
        let _ = block_id_serializer.serialize(&self.last_block_id, &mut last_block_id);

        let leaves: Vec<Vec<u8>> = vec![
            version,
            self.chain_id.as_bytes().to_vec(),
            height,
            time,
            last_block_id,
            self.last_commit_hash.to_bytes().to_vec(),
            self.data_hash.to_bytes().to_vec(),
            self.validators_hash.to_bytes().to_vec(),
            self.next_validators_hash.to_bytes().to_vec(),
            self.consensus_hash.to_bytes().to_vec(),
            self.app_hash.clone(),
            self.last_results_hash.to_bytes().to_vec(),
            self.evidence_hash.to_bytes().to_vec(),
            self.proposer_address.to_bytes().to_vec(),
        ];
        merkle::hash_from_bytes_list(&leaves)
    }

    /// Structural checks.
    pub fn validate_basic(&self) -> Result<(), ModelsError> {
        if self.chain_id.len() > MAX_CHAIN_ID_LENGTH {
            return Err(ModelsError::InvalidBlock(format!(
                "chain id longer than {} characters",
                MAX_CHAIN_ID_LENGTH
            )));
        }
        if self.height <= 0 {
            return Err(ModelsError::InvalidBlock(
                "header height must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// A header together with the commit that sealed it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SignedHeader {
    /// The sealed header.
    pub header: BlockHeader,
    /// The +2/3 commit for the header.
    pub commit: Commit,
}

/// A full block.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    /// Header.
    pub header: BlockHeader,
    /// Transactions.
    pub data: Data,
    /// Evidence of byzantine behavior included in this block.
    pub evidence: EvidenceList,
    /// Commit of height − 1.
    pub last_commit: Commit,
}

impl Block {
    /// Hash of the block: the header hash.
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Structural checks tying the header digests to the body.
    pub fn validate_basic(&self) -> Result<(), ModelsError> {
        self.header.validate_basic()?;
        if self.header.data_hash != self.data.hash() {
            return Err(ModelsError::InvalidBlock("wrong data hash".into()));
        }
        if self.header.evidence_hash != self.evidence.hash() {
            return Err(ModelsError::InvalidBlock("wrong evidence hash".into()));
        }
        if self.header.height > 1 && self.header.last_commit_hash != self.last_commit.hash() {
            return Err(ModelsError::InvalidBlock("wrong last commit hash".into()));
        }
        for evidence in &self.evidence.evidence {
            evidence.validate_basic()?;
        }
        Ok(())
    }

    /// Canonical serialization of the whole block.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ModelsError> {
        Ok(BlockSerializer::new().serialize_to_vec(self)?)
    }

    /// Split the canonical serialization into a Merkle-rooted part set.
    pub fn make_part_set(&self) -> Result<PartSet, ModelsError> {
        PartSet::from_data(&self.to_bytes()?, PART_SIZE)
    }

    /// Rebuild a block from assembled part bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Block, ModelsError> {
        let (rest, block) = BlockDeserializer::new()
            .deserialize::<corten_serialization::DeserializeError>(data)
            .map_err(|err| ModelsError::DeserializeError(err.to_string()))?;
        if !rest.is_empty() {
            return Err(ModelsError::DeserializeError(
                "trailing bytes after block".into(),
            ));
        }
        Ok(block)
    }
}

impl std::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Block(height={} txs={} evidence={})",
            self.header.height,
            self.data.txs.len(),
            self.evidence.evidence.len()
        )
    }
}

/// Stored metadata of one block.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BlockMeta {
    /// Block id (header hash and part-set header).
    pub block_id: BlockId,
    /// Size of the canonical serialization in bytes.
    pub block_size: i64,
    /// The header itself.
    pub header: BlockHeader,
    /// Number of transactions.
    pub num_txs: i64,
}

impl BlockMeta {
    /// Build the metadata of `block` fragmented as `parts`.
    pub fn from_block(block: &Block, parts: &PartSet) -> Result<Self, ModelsError> {
        let bytes = block.to_bytes()?;
        Ok(BlockMeta {
            block_id: BlockId {
                hash: block.hash(),
                part_set_header: parts.header(),
            },
            block_size: bytes.len() as i64,
            header: block.header.clone(),
            num_txs: block.data.txs.len() as i64,
        })
    }
}

/// Serializer for [`BlockHeader`].
#[derive(Clone, Default)]
pub struct BlockHeaderSerializer {
    u64_serializer: U64VarIntSerializer,
    i64_serializer: I64VarIntSerializer,
    vec_u8_serializer: VecU8Serializer,
    timestamp_serializer: TimestampSerializer,
    block_id_serializer: BlockIdSerializer,
    hash_serializer: HashSerializer,
    address_serializer: AddressSerializer,
}

impl BlockHeaderSerializer {
    /// Create a header serializer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Serializer<BlockHeader> for BlockHeaderSerializer {
    fn serialize(&self, value: &BlockHeader, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.u64_serializer.serialize(&value.version.block, buffer)?;
        self.u64_serializer.serialize(&value.version.app, buffer)?;
        self.vec_u8_serializer
            .serialize(&value.chain_id.as_bytes().to_vec(), buffer)?;
        self.i64_serializer.serialize(&value.height, buffer)?;
        self.timestamp_serializer.serialize(&value.time, buffer)?;
        self.block_id_serializer
            .serialize(&value.last_block_id, buffer)?;
        self.hash_serializer
            .serialize(&value.last_commit_hash, buffer)?;
        self.hash_serializer.serialize(&value.data_hash, buffer)?;
        self.hash_serializer
            .serialize(&value.validators_hash, buffer)?;
        self.hash_serializer
            .serialize(&value.next_validators_hash, buffer)?;
        self.hash_serializer
            .serialize(&value.consensus_hash, buffer)?;
        self.vec_u8_serializer.serialize(&value.app_hash, buffer)?;
        self.hash_serializer
            .serialize(&value.last_results_hash, buffer)?;
        self.hash_serializer
            .serialize(&value.evidence_hash, buffer)?;
        self.address_serializer
            .serialize(&value.proposer_address, buffer)
    }
}

/// Deserializer for [`BlockHeader`].
#[derive(Clone)]
pub struct BlockHeaderDeserializer {
    u64_deserializer: U64VarIntDeserializer,
    i64_deserializer: I64VarIntDeserializer,
    chain_id_deserializer: VecU8Deserializer,
    app_hash_deserializer: VecU8Deserializer,
    timestamp_deserializer: TimestampDeserializer,
    block_id_deserializer: BlockIdDeserializer,
    hash_deserializer: HashDeserializer,
    address_deserializer: AddressDeserializer,
}

impl BlockHeaderDeserializer {
    /// Create a header deserializer.
    pub fn new() -> Self {
        Self {
            u64_deserializer: U64VarIntDeserializer::new(Included(0), Included(u64::MAX)),
            i64_deserializer: I64VarIntDeserializer::new(),
            chain_id_deserializer: VecU8Deserializer::new(MAX_CHAIN_ID_LENGTH as u64),
            app_hash_deserializer: VecU8Deserializer::new(1024),
            timestamp_deserializer: TimestampDeserializer::new(),
            block_id_deserializer: BlockIdDeserializer::new(),
            hash_deserializer: HashDeserializer::new(),
            address_deserializer: AddressDeserializer::new(),
        }
    }
}

impl Default for BlockHeaderDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<BlockHeader> for BlockHeaderDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], BlockHeader, E> {
        context("Failed block header deserialization", |input: &'a [u8]| {
            let (rest, version_block) = self.u64_deserializer.deserialize(input)?;
            let (rest, version_app) = self.u64_deserializer.deserialize(rest)?;
            let (rest, chain_id_bytes) = self.chain_id_deserializer.deserialize(rest)?;
            let chain_id = String::from_utf8(chain_id_bytes).map_err(|_| {
                nom::Err::Error(ParseError::from_error_kind(
                    input,
                    nom::error::ErrorKind::Verify,
                ))
            })?;
            let (rest, height) = self.i64_deserializer.deserialize(rest)?;
            let (rest, time) = self.timestamp_deserializer.deserialize(rest)?;
            let (rest, last_block_id) = self.block_id_deserializer.deserialize(rest)?;
            let (rest, last_commit_hash) = self.hash_deserializer.deserialize(rest)?;
            let (rest, data_hash) = self.hash_deserializer.deserialize(rest)?;
            let (rest, validators_hash) = self.hash_deserializer.deserialize(rest)?;
            let (rest, next_validators_hash) = self.hash_deserializer.deserialize(rest)?;
            let (rest, consensus_hash) = self.hash_deserializer.deserialize(rest)?;
            let (rest, app_hash) = self.app_hash_deserializer.deserialize(rest)?;
            let (rest, last_results_hash) = self.hash_deserializer.deserialize(rest)?;
            let (rest, evidence_hash) = self.hash_deserializer.deserialize(rest)?;
            let (rest, proposer_address) = self.address_deserializer.deserialize(rest)?;
            Ok((
                rest,
                BlockHeader {
                    version: Version {
                        block: version_block,
                        app: version_app,
                    },
                    chain_id,
                    height,
                    time,
                    last_block_id,
                    last_commit_hash,
                    data_hash,
                    validators_hash,
                    next_validators_hash,
                    consensus_hash,
                    app_hash,
                    last_results_hash,
                    evidence_hash,
                    proposer_address,
                },
            ))
        })(buffer)
    }
}

/// Serializer for [`Block`].
#[derive(Clone, Default)]
pub struct BlockSerializer {
    header_serializer: BlockHeaderSerializer,
    u64_serializer: U64VarIntSerializer,
    vec_u8_serializer: VecU8Serializer,
    evidence_serializer: EvidenceListSerializer,
    commit_serializer: CommitSerializer,
}

impl BlockSerializer {
    /// Create a block serializer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Serializer<Block> for BlockSerializer {
    fn serialize(&self, value: &Block, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.header_serializer.serialize(&value.header, buffer)?;
        self.u64_serializer
            .serialize(&(value.data.txs.len() as u64), buffer)?;
        for tx in &value.data.txs {
            self.vec_u8_serializer.serialize(&tx.0, buffer)?;
        }
        self.evidence_serializer.serialize(&value.evidence, buffer)?;
        self.commit_serializer.serialize(&value.last_commit, buffer)
    }
}

/// Deserializer for [`Block`].
#[derive(Clone)]
pub struct BlockDeserializer {
    header_deserializer: BlockHeaderDeserializer,
    tx_count_deserializer: U64VarIntDeserializer,
    tx_deserializer: VecU8Deserializer,
    evidence_deserializer: EvidenceListDeserializer,
    commit_deserializer: CommitDeserializer,
}

impl BlockDeserializer {
    /// Create a block deserializer.
    pub fn new() -> Self {
        Self {
            header_deserializer: BlockHeaderDeserializer::new(),
            tx_count_deserializer: U64VarIntDeserializer::new(
                Included(0),
                Included(MAX_TXS_PER_BLOCK),
            ),
            tx_deserializer: VecU8Deserializer::new(
                crate::consensus_params::MAX_BLOCK_SIZE_BYTES as u64,
            ),
            evidence_deserializer: EvidenceListDeserializer::new(),
            commit_deserializer: CommitDeserializer::new(u16::MAX as u64),
        }
    }
}

impl Default for BlockDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<Block> for BlockDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Block, E> {
        context("Failed block deserialization", |input: &'a [u8]| {
            let (rest, header) = self.header_deserializer.deserialize(input)?;
            let (rest, txs) = length_count(
                context("Failed tx count deserialization", |input| {
                    self.tx_count_deserializer.deserialize(input)
                }),
                context("Failed tx deserialization", |input| {
                    self.tx_deserializer.deserialize(input)
                }),
            )(rest)?;
            let (rest, evidence) = self.evidence_deserializer.deserialize(rest)?;
            let (rest, last_commit) = self.commit_deserializer.deserialize(rest)?;
            Ok((
                rest,
                Block {
                    header,
                    data: Data {
                        txs: txs.into_iter().map(Tx).collect(),
                    },
                    evidence,
                    last_commit,
                },
            ))
        })(buffer)
    }
}

/// Serializer for [`BlockMeta`].
#[derive(Clone, Default)]
pub struct BlockMetaSerializer {
    block_id_serializer: BlockIdSerializer,
    i64_serializer: I64VarIntSerializer,
    header_serializer: BlockHeaderSerializer,
}

impl BlockMetaSerializer {
    /// Create a block meta serializer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Serializer<BlockMeta> for BlockMetaSerializer {
    fn serialize(&self, value: &BlockMeta, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.block_id_serializer.serialize(&value.block_id, buffer)?;
        self.i64_serializer.serialize(&value.block_size, buffer)?;
        self.header_serializer.serialize(&value.header, buffer)?;
        self.i64_serializer.serialize(&value.num_txs, buffer)
    }
}

/// Deserializer for [`BlockMeta`].
#[derive(Clone, Default)]
pub struct BlockMetaDeserializer {
    block_id_deserializer: BlockIdDeserializer,
    i64_deserializer: I64VarIntDeserializer,
    header_deserializer: BlockHeaderDeserializer,
}

impl BlockMetaDeserializer {
    /// Create a block meta deserializer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Deserializer<BlockMeta> for BlockMetaDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], BlockMeta, E> {
        context("Failed block meta deserialization", |input: &'a [u8]| {
            let (rest, block_id) = self.block_id_deserializer.deserialize(input)?;
            let (rest, block_size) = self.i64_deserializer.deserialize(rest)?;
            let (rest, header) = self.header_deserializer.deserialize(rest)?;
            let (rest, num_txs) = self.i64_deserializer.deserialize(rest)?;
            Ok((
                rest,
                BlockMeta {
                    block_id,
                    block_size,
                    header,
                    num_txs,
                },
            ))
        })(buffer)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::evidence::EvidenceList;

    pub(crate) fn sample_header(height: Height) -> BlockHeader {
        BlockHeader {
            version: Version { block: 11, app: 1 },
            chain_id: "test-chain".into(),
            height,
            time: Timestamp::from_millis(1_000 + height as u64),
            last_block_id: BlockId::ZERO,
            last_commit_hash: Hash::compute_from(b"last-commit"),
            data_hash: Hash::ZERO,
            validators_hash: Hash::compute_from(b"vals"),
            next_validators_hash: Hash::compute_from(b"next-vals"),
            consensus_hash: Hash::compute_from(b"params"),
            app_hash: vec![1, 2, 3],
            last_results_hash: Hash::compute_from(b"results"),
            evidence_hash: Hash::ZERO,
            proposer_address: Address::from_bytes(&[7u8; 20]),
        }
    }

    pub(crate) fn sample_block(height: Height, txs: Vec<Tx>) -> Block {
        let data = Data { txs };
        let evidence = EvidenceList::default();
        let mut header = sample_header(height);
        header.data_hash = data.hash();
        header.evidence_hash = evidence.hash();
        let mut last_commit = Commit::empty();
        if height > 1 {
            last_commit.height = height - 1;
        }
        let block = Block {
            header,
            data,
            evidence,
            last_commit,
        };
        let mut block = block;
        block.header.last_commit_hash = block.last_commit.hash();
        block
    }

    #[test]
    fn header_hash_changes_with_fields() {
        let header = sample_header(5);
        let mut other = header.clone();
        other.height = 6;
        assert_ne!(header.hash(), other.hash());
    }

    #[test]
    fn block_roundtrip() {
        let block = sample_block(3, vec![Tx(vec![1, 2]), Tx(vec![3])]);
        let bytes = block.to_bytes().unwrap();
        let decoded = Block::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.hash(), block.hash());
    }

    #[test]
    fn validate_basic_checks_digests() {
        let mut block = sample_block(2, vec![Tx(vec![9])]);
        block.validate_basic().unwrap();
        block.header.data_hash = Hash::compute_from(b"wrong");
        assert!(block.validate_basic().is_err());
    }

    #[test]
    fn part_set_identifies_block() {
        let block = sample_block(4, vec![Tx(vec![0u8; 100_000])]);
        let parts = block.make_part_set().unwrap();
        assert!(parts.header().total > 1);
        let meta = BlockMeta::from_block(&block, &parts).unwrap();
        assert_eq!(meta.block_id.hash, block.hash());
        assert_eq!(meta.num_txs, 1);
    }
}
