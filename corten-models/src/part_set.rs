//! Part sets: a block's canonical serialization chunked into fixed-size
//! parts under a Merkle root, assembled out of order on the receiving side.

use crate::bit_array::BitArray;
use crate::block_id::PartSetHeader;
use crate::error::ModelsError;
use corten_hash::{merkle, Hash};
use corten_serialization::{
    Deserializer, SerializeError, Serializer, U32VarIntDeserializer, U32VarIntSerializer,
    VecU8Deserializer, VecU8Serializer,
};
use nom::{
    error::{context, ContextError, ParseError},
    IResult,
};
use std::ops::Bound::Included;

/// Size of one part in bytes.
pub const PART_SIZE: usize = 65_536;

/// One chunk of a block with its inclusion proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// Position of the chunk.
    pub index: u32,
    /// Chunk bytes; all parts but the last are exactly [`PART_SIZE`] long.
    pub bytes: Vec<u8>,
    /// Merkle inclusion proof against the part-set root.
    pub proof: merkle::Proof,
}

/// Assembly state of one block's parts.
#[derive(Debug, Clone)]
pub struct PartSet {
    total: u32,
    hash: Hash,
    parts: Vec<Option<Part>>,
    parts_bit_array: BitArray,
    count: u32,
    byte_size: usize,
}

impl PartSet {
    /// Chunk `data` into parts of `part_size` bytes and build the proofs.
    pub fn from_data(data: &[u8], part_size: usize) -> Result<Self, ModelsError> {
        if data.is_empty() {
            return Err(ModelsError::InvalidPart("empty block data".into()));
        }
        let chunks: Vec<&[u8]> = data.chunks(part_size).collect();
        let (root, proofs) = merkle::proofs_from_bytes_list(&chunks);
        let parts: Vec<Option<Part>> = chunks
            .iter()
            .zip(proofs)
            .enumerate()
            .map(|(index, (chunk, proof))| {
                Some(Part {
                    index: index as u32,
                    bytes: chunk.to_vec(),
                    proof,
                })
            })
            .collect();
        let total = parts.len() as u32;
        let mut parts_bit_array = BitArray::new(total as usize);
        for index in 0..total as usize {
            parts_bit_array.set_index(index, true);
        }
        Ok(PartSet {
            total,
            hash: root,
            parts,
            parts_bit_array,
            count: total,
            byte_size: data.len(),
        })
    }

    /// Start an empty assembly for the parts described by `header`.
    pub fn from_header(header: PartSetHeader) -> Self {
        PartSet {
            total: header.total,
            hash: header.hash,
            parts: vec![None; header.total as usize],
            parts_bit_array: BitArray::new(header.total as usize),
            count: 0,
            byte_size: 0,
        }
    }

    /// The part-set header identifying this set.
    pub fn header(&self) -> PartSetHeader {
        PartSetHeader {
            total: self.total,
            hash: self.hash,
        }
    }

    /// True when the set matches `header`.
    pub fn has_header(&self, header: &PartSetHeader) -> bool {
        self.header() == *header
    }

    /// Number of parts received so far.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Expected number of parts.
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Bytes received so far.
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// Bit array of received parts.
    pub fn bit_array(&self) -> BitArray {
        self.parts_bit_array.clone()
    }

    /// True once every part is present.
    pub fn is_complete(&self) -> bool {
        self.count == self.total
    }

    /// Fetch one part.
    pub fn get_part(&self, index: usize) -> Option<&Part> {
        self.parts.get(index).and_then(|slot| slot.as_ref())
    }

    /// Add a received part after verifying its proof against the root.
    /// Returns `false` when the slot was already filled.
    pub fn add_part(&mut self, part: Part) -> Result<bool, ModelsError> {
        let index = part.index as usize;
        if part.index >= self.total {
            return Err(ModelsError::InvalidPart(format!(
                "part index {} out of range (total {})",
                part.index, self.total
            )));
        }
        if self.parts[index].is_some() {
            return Ok(false);
        }
        if part.proof.index != part.index || part.proof.total != self.total {
            return Err(ModelsError::InvalidPart(
                "proof position does not match part".into(),
            ));
        }
        if !part.proof.verify(&self.hash, &part.bytes) {
            return Err(ModelsError::InvalidPart(
                "part proof does not verify against the set root".into(),
            ));
        }
        self.byte_size += part.bytes.len();
        self.parts_bit_array.set_index(index, true);
        self.parts[index] = Some(part);
        self.count += 1;
        Ok(true)
    }

    /// Concatenate all parts back into the block's canonical bytes.
    pub fn assemble(&self) -> Result<Vec<u8>, ModelsError> {
        if !self.is_complete() {
            return Err(ModelsError::InvalidPart(format!(
                "part set incomplete: {}/{}",
                self.count, self.total
            )));
        }
        let mut data = Vec::with_capacity(self.byte_size);
        for part in self.parts.iter().flatten() {
            data.extend_from_slice(&part.bytes);
        }
        Ok(data)
    }
}

/// Serializer for [`Part`].
#[derive(Clone, Default)]
pub struct PartSerializer {
    u32_serializer: U32VarIntSerializer,
    bytes_serializer: VecU8Serializer,
    proof_serializer: merkle::ProofSerializer,
}

impl PartSerializer {
    /// Create a part serializer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Serializer<Part> for PartSerializer {
    fn serialize(&self, value: &Part, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.u32_serializer.serialize(&value.index, buffer)?;
        self.bytes_serializer.serialize(&value.bytes, buffer)?;
        self.proof_serializer.serialize(&value.proof, buffer)
    }
}

/// Deserializer for [`Part`].
#[derive(Clone)]
pub struct PartDeserializer {
    index_deserializer: U32VarIntDeserializer,
    bytes_deserializer: VecU8Deserializer,
    proof_deserializer: merkle::ProofDeserializer,
}

impl PartDeserializer {
    /// Create a part deserializer.
    pub fn new() -> Self {
        Self {
            index_deserializer: U32VarIntDeserializer::new(Included(0), Included(u32::MAX)),
            bytes_deserializer: VecU8Deserializer::new(PART_SIZE as u64),
            proof_deserializer: merkle::ProofDeserializer::new(),
        }
    }
}

impl Default for PartDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<Part> for PartDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Part, E> {
        context("Failed part deserialization", |input: &'a [u8]| {
            let (rest, index) = self.index_deserializer.deserialize(input)?;
            let (rest, bytes) = self.bytes_deserializer.deserialize(rest)?;
            let (rest, proof) = self.proof_deserializer.deserialize(rest)?;
            Ok((
                rest,
                Part {
                    index,
                    bytes,
                    proof,
                },
            ))
        })(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nom::error::VerboseError;

    #[test]
    fn chunk_and_reassemble() {
        let data = vec![42u8; PART_SIZE * 2 + 100];
        let source = PartSet::from_data(&data, PART_SIZE).unwrap();
        assert_eq!(source.total(), 3);
        assert!(source.is_complete());

        // receive parts out of order
        let mut sink = PartSet::from_header(source.header());
        assert!(!sink.is_complete());
        for index in [2usize, 0, 1] {
            let part = source.get_part(index).unwrap().clone();
            assert!(sink.add_part(part).unwrap());
        }
        assert!(sink.is_complete());
        assert_eq!(sink.assemble().unwrap(), data);
    }

    #[test]
    fn duplicate_part_ignored() {
        let data = vec![7u8; PART_SIZE + 1];
        let source = PartSet::from_data(&data, PART_SIZE).unwrap();
        let mut sink = PartSet::from_header(source.header());
        let part = source.get_part(0).unwrap().clone();
        assert!(sink.add_part(part.clone()).unwrap());
        assert!(!sink.add_part(part).unwrap());
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn corrupted_part_rejected() {
        let data = vec![1u8; PART_SIZE * 2];
        let source = PartSet::from_data(&data, PART_SIZE).unwrap();
        let mut sink = PartSet::from_header(source.header());
        let mut part = source.get_part(0).unwrap().clone();
        part.bytes[0] ^= 0xff;
        assert!(sink.add_part(part).is_err());

        // out-of-range index
        let mut part = source.get_part(1).unwrap().clone();
        part.index = 9;
        assert!(sink.add_part(part).is_err());
    }

    #[test]
    fn two_sources_same_bytes_same_header() {
        let data = vec![3u8; PART_SIZE + 5];
        let a = PartSet::from_data(&data, PART_SIZE).unwrap();
        let b = PartSet::from_data(&data, PART_SIZE).unwrap();
        assert_eq!(a.header(), b.header());
    }

    #[test]
    fn part_wire_roundtrip() {
        let data = vec![9u8; PART_SIZE / 2];
        let source = PartSet::from_data(&data, PART_SIZE).unwrap();
        let part = source.get_part(0).unwrap().clone();
        let mut buffer = Vec::new();
        PartSerializer::new().serialize(&part, &mut buffer).unwrap();
        let (rest, decoded) = PartDeserializer::new()
            .deserialize::<VerboseError<&[u8]>>(&buffer)
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, part);
    }
}
