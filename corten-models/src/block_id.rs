//! Block identifiers: the block hash plus the part-set header that describes
//! how the block was fragmented for gossip.

use corten_hash::{Hash, HashDeserializer, HashSerializer};
use corten_serialization::{
    proto, Deserializer, SerializeError, Serializer, U32VarIntDeserializer, U32VarIntSerializer,
};
use nom::{
    error::{context, ContextError, ParseError},
    sequence::tuple,
    IResult, Parser,
};
use std::ops::Bound::Included;

/// Count and Merkle root of a block's parts.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct PartSetHeader {
    /// Number of parts.
    pub total: u32,
    /// Merkle root over the part chunks.
    pub hash: Hash,
}

impl PartSetHeader {
    /// The nil header.
    pub const ZERO: PartSetHeader = PartSetHeader {
        total: 0,
        hash: Hash::ZERO,
    };

    /// True for the nil header.
    pub fn is_zero(&self) -> bool {
        self.total == 0 && self.hash.is_zero()
    }
}

impl std::fmt::Display for PartSetHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.total, self.hash)
    }
}

/// Identifier of one proposed or committed block.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct BlockId {
    /// Hash of the block header.
    pub hash: Hash,
    /// Part-set header of the block's canonical serialization.
    pub part_set_header: PartSetHeader,
}

impl BlockId {
    /// The nil block id, voted for to signal "no block".
    pub const ZERO: BlockId = BlockId {
        hash: Hash::ZERO,
        part_set_header: PartSetHeader::ZERO,
    };

    /// True for the nil block id.
    pub fn is_zero(&self) -> bool {
        self.hash.is_zero() && self.part_set_header.is_zero()
    }

    /// True when the id carries a non-empty part-set header.
    pub fn is_complete(&self) -> bool {
        self.part_set_header.total > 0
    }

    /// Machine-readable map key. Canonical evidence ordering compares these.
    pub fn key(&self) -> String {
        format!(
            "{}{}{}",
            self.hash.to_hex(),
            self.part_set_header.hash.to_hex(),
            self.part_set_header.total
        )
    }

    /// Canonical protobuf body used inside signing payloads.
    pub(crate) fn canonical_bytes(&self) -> Vec<u8> {
        let mut part_set_header = Vec::new();
        proto::write_varint_field(1, self.part_set_header.total as u64, &mut part_set_header);
        if !self.part_set_header.hash.is_zero() {
            proto::write_bytes_field(2, self.part_set_header.hash.to_bytes(), &mut part_set_header);
        }
        let mut body = Vec::new();
        if !self.hash.is_zero() {
            proto::write_bytes_field(1, self.hash.to_bytes(), &mut body);
        }
        proto::write_message_field(2, &part_set_header, &mut body);
        body
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}@{}", self.hash, self.part_set_header)
    }
}

/// Serializer for [`PartSetHeader`].
#[derive(Clone, Default)]
pub struct PartSetHeaderSerializer {
    u32_serializer: U32VarIntSerializer,
    hash_serializer: HashSerializer,
}

impl PartSetHeaderSerializer {
    /// Create a part-set header serializer.
    pub const fn new() -> Self {
        Self {
            u32_serializer: U32VarIntSerializer::new(),
            hash_serializer: HashSerializer::new(),
        }
    }
}

impl Serializer<PartSetHeader> for PartSetHeaderSerializer {
    fn serialize(&self, value: &PartSetHeader, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.u32_serializer.serialize(&value.total, buffer)?;
        self.hash_serializer.serialize(&value.hash, buffer)
    }
}

/// Deserializer for [`PartSetHeader`].
#[derive(Clone)]
pub struct PartSetHeaderDeserializer {
    total_deserializer: U32VarIntDeserializer,
    hash_deserializer: HashDeserializer,
}

impl PartSetHeaderDeserializer {
    /// Create a part-set header deserializer.
    pub const fn new() -> Self {
        Self {
            total_deserializer: U32VarIntDeserializer::new(Included(0), Included(u32::MAX)),
            hash_deserializer: HashDeserializer::new(),
        }
    }
}

impl Default for PartSetHeaderDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<PartSetHeader> for PartSetHeaderDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], PartSetHeader, E> {
        context(
            "Failed part-set header deserialization",
            tuple((
                context("Failed total deserialization", |input| {
                    self.total_deserializer.deserialize(input)
                }),
                context("Failed hash deserialization", |input| {
                    self.hash_deserializer.deserialize(input)
                }),
            )),
        )
        .map(|(total, hash)| PartSetHeader { total, hash })
        .parse(buffer)
    }
}

/// Serializer for [`BlockId`].
#[derive(Clone, Default)]
pub struct BlockIdSerializer {
    hash_serializer: HashSerializer,
    header_serializer: PartSetHeaderSerializer,
}

impl BlockIdSerializer {
    /// Create a block id serializer.
    pub const fn new() -> Self {
        Self {
            hash_serializer: HashSerializer::new(),
            header_serializer: PartSetHeaderSerializer::new(),
        }
    }
}

impl Serializer<BlockId> for BlockIdSerializer {
    fn serialize(&self, value: &BlockId, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.hash_serializer.serialize(&value.hash, buffer)?;
        self.header_serializer
            .serialize(&value.part_set_header, buffer)
    }
}

/// Deserializer for [`BlockId`].
#[derive(Clone, Default)]
pub struct BlockIdDeserializer {
    hash_deserializer: HashDeserializer,
    header_deserializer: PartSetHeaderDeserializer,
}

impl BlockIdDeserializer {
    /// Create a block id deserializer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Deserializer<BlockId> for BlockIdDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], BlockId, E> {
        context(
            "Failed block id deserialization",
            tuple((
                context("Failed hash deserialization", |input| {
                    self.hash_deserializer.deserialize(input)
                }),
                context("Failed part-set header deserialization", |input| {
                    self.header_deserializer.deserialize(input)
                }),
            )),
        )
        .map(|(hash, part_set_header)| BlockId {
            hash,
            part_set_header,
        })
        .parse(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nom::error::VerboseError;

    #[test]
    fn zero_and_key() {
        assert!(BlockId::ZERO.is_zero());
        assert!(!BlockId::ZERO.is_complete());
        let id = BlockId {
            hash: Hash::compute_from(b"block"),
            part_set_header: PartSetHeader {
                total: 3,
                hash: Hash::compute_from(b"parts"),
            },
        };
        assert!(id.is_complete());
        assert_ne!(id.key(), BlockId::ZERO.key());
    }

    #[test]
    fn wire_roundtrip() {
        let id = BlockId {
            hash: Hash::compute_from(b"a"),
            part_set_header: PartSetHeader {
                total: 7,
                hash: Hash::compute_from(b"b"),
            },
        };
        let mut buffer = Vec::new();
        BlockIdSerializer::new().serialize(&id, &mut buffer).unwrap();
        let (rest, decoded) = BlockIdDeserializer::new()
            .deserialize::<VerboseError<&[u8]>>(&buffer)
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, id);
    }
}
