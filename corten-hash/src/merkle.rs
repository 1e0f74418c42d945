//! Merkle tree over byte lists, RFC-6962 shape: leaves are hashed with a
//! `0x00` prefix, inner nodes with a `0x01` prefix, and the split point of an
//! `n`-leaf tree is the largest power of two strictly below `n`. Part sets,
//! evidence lists, transaction lists, and the header all use this root.

use crate::hash::{Hash, HashDeserializer, HashSerializer};
use corten_serialization::{
    Deserializer, SerializeError, Serializer, U32VarIntDeserializer, U32VarIntSerializer,
    U64VarIntDeserializer, U64VarIntSerializer,
};
use nom::{
    error::{context, ContextError, ParseError},
    multi::length_count,
    sequence::tuple,
    IResult, Parser,
};
use std::ops::Bound::{Excluded, Included};

const LEAF_PREFIX: u8 = 0x00;
const INNER_PREFIX: u8 = 0x01;

/// Root of the empty tree: SHA-256 of the empty string.
pub fn empty_hash() -> Hash {
    Hash::compute_from(&[])
}

fn leaf_hash(leaf: &[u8]) -> Hash {
    Hash::compute_from_tuple(&[&[LEAF_PREFIX], leaf])
}

fn inner_hash(left: &Hash, right: &Hash) -> Hash {
    Hash::compute_from_tuple(&[&[INNER_PREFIX], left.to_bytes(), right.to_bytes()])
}

/// Largest power of two strictly less than `n`. `n` must be at least 2.
fn split_point(n: usize) -> usize {
    debug_assert!(n > 1);
    let mut split = 1usize;
    while split * 2 < n {
        split *= 2;
    }
    split
}

/// Merkle root of a list of byte leaves.
pub fn hash_from_bytes_list<T: AsRef<[u8]>>(items: &[T]) -> Hash {
    match items.len() {
        0 => empty_hash(),
        1 => leaf_hash(items[0].as_ref()),
        n => {
            let split = split_point(n);
            let left = hash_from_bytes_list(&items[..split]);
            let right = hash_from_bytes_list(&items[split..]);
            inner_hash(&left, &right)
        }
    }
}

/// Merkle inclusion proof for one leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proof {
    /// Total number of leaves in the tree.
    pub total: u32,
    /// Index of the proven leaf.
    pub index: u32,
    /// Hash of the proven leaf.
    pub leaf_hash: Hash,
    /// Sibling hashes from leaf to root.
    pub aunts: Vec<Hash>,
}

impl Proof {
    /// Verify the proof against an expected root and the leaf bytes.
    pub fn verify(&self, root: &Hash, leaf: &[u8]) -> bool {
        if leaf_hash(leaf) != self.leaf_hash {
            return false;
        }
        match compute_root_from_aunts(
            self.index as usize,
            self.total as usize,
            self.leaf_hash,
            &self.aunts,
        ) {
            Some(computed) => computed == *root,
            None => false,
        }
    }
}

fn compute_root_from_aunts(index: usize, total: usize, leaf: Hash, aunts: &[Hash]) -> Option<Hash> {
    if index >= total || total == 0 {
        return None;
    }
    match total {
        1 => {
            if aunts.is_empty() {
                Some(leaf)
            } else {
                None
            }
        }
        _ => {
            let (last, rest) = aunts.split_last()?;
            let split = split_point(total);
            if index < split {
                let left = compute_root_from_aunts(index, split, leaf, rest)?;
                Some(inner_hash(&left, last))
            } else {
                let right = compute_root_from_aunts(index - split, total - split, leaf, rest)?;
                Some(inner_hash(last, &right))
            }
        }
    }
}

/// Build the root and one inclusion proof per leaf.
pub fn proofs_from_bytes_list<T: AsRef<[u8]>>(items: &[T]) -> (Hash, Vec<Proof>) {
    let total = items.len();
    let leaf_hashes: Vec<Hash> = items.iter().map(|item| leaf_hash(item.as_ref())).collect();
    let root = match total {
        0 => empty_hash(),
        _ => root_from_leaf_hashes(&leaf_hashes),
    };
    let proofs = (0..total)
        .map(|index| {
            let mut aunts = Vec::new();
            collect_aunts(&leaf_hashes, index, &mut aunts);
            Proof {
                total: total as u32,
                index: index as u32,
                leaf_hash: leaf_hashes[index],
                aunts,
            }
        })
        .collect();
    (root, proofs)
}

fn root_from_leaf_hashes(leaves: &[Hash]) -> Hash {
    match leaves.len() {
        0 => empty_hash(),
        1 => leaves[0],
        n => {
            let split = split_point(n);
            inner_hash(
                &root_from_leaf_hashes(&leaves[..split]),
                &root_from_leaf_hashes(&leaves[split..]),
            )
        }
    }
}

// Aunts are collected root-last so that verification can split_last() its way
// down the tree.
fn collect_aunts(leaves: &[Hash], index: usize, aunts: &mut Vec<Hash>) {
    if leaves.len() <= 1 {
        return;
    }
    let split = split_point(leaves.len());
    if index < split {
        collect_aunts(&leaves[..split], index, aunts);
        aunts.push(root_from_leaf_hashes(&leaves[split..]));
    } else {
        collect_aunts(&leaves[split..], index - split, aunts);
        aunts.push(root_from_leaf_hashes(&leaves[..split]));
    }
}

/// Serializer for [`Proof`].
#[derive(Clone, Default)]
pub struct ProofSerializer {
    u32_serializer: U32VarIntSerializer,
    u64_serializer: U64VarIntSerializer,
    hash_serializer: HashSerializer,
}

impl ProofSerializer {
    /// Create a proof serializer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Serializer<Proof> for ProofSerializer {
    fn serialize(&self, value: &Proof, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.u32_serializer.serialize(&value.total, buffer)?;
        self.u32_serializer.serialize(&value.index, buffer)?;
        self.hash_serializer.serialize(&value.leaf_hash, buffer)?;
        self.u64_serializer
            .serialize(&(value.aunts.len() as u64), buffer)?;
        for aunt in &value.aunts {
            self.hash_serializer.serialize(aunt, buffer)?;
        }
        Ok(())
    }
}

/// Deserializer for [`Proof`].
#[derive(Clone)]
pub struct ProofDeserializer {
    u32_deserializer: U32VarIntDeserializer,
    aunt_count_deserializer: U64VarIntDeserializer,
    hash_deserializer: HashDeserializer,
}

impl ProofDeserializer {
    /// Create a proof deserializer. Aunt chains longer than 64 entries are
    /// rejected (a tree deeper than the leaf count can ever justify).
    pub fn new() -> Self {
        Self {
            u32_deserializer: U32VarIntDeserializer::new(Included(0), Included(u32::MAX)),
            aunt_count_deserializer: U64VarIntDeserializer::new(Included(0), Excluded(65)),
            hash_deserializer: HashDeserializer::new(),
        }
    }
}

impl Default for ProofDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<Proof> for ProofDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Proof, E> {
        context(
            "Failed proof deserialization",
            tuple((
                context("Failed total deserialization", |input| {
                    self.u32_deserializer.deserialize(input)
                }),
                context("Failed index deserialization", |input| {
                    self.u32_deserializer.deserialize(input)
                }),
                context("Failed leaf_hash deserialization", |input| {
                    self.hash_deserializer.deserialize(input)
                }),
                length_count(
                    context("Failed aunt count deserialization", |input| {
                        self.aunt_count_deserializer.deserialize(input)
                    }),
                    context("Failed aunt deserialization", |input| {
                        self.hash_deserializer.deserialize(input)
                    }),
                ),
            )),
        )
        .map(|(total, index, leaf_hash, aunts)| Proof {
            total,
            index,
            leaf_hash,
            aunts,
        })
        .parse(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_root_is_empty_hash() {
        let items: Vec<Vec<u8>> = vec![];
        assert_eq!(hash_from_bytes_list(&items), empty_hash());
    }

    #[test]
    fn single_leaf_root() {
        let items = vec![b"one".to_vec()];
        assert_eq!(hash_from_bytes_list(&items), leaf_hash(b"one"));
    }

    #[test]
    fn proofs_verify_for_all_sizes() {
        for n in 1usize..=9 {
            let items: Vec<Vec<u8>> = (0..n).map(|i| vec![i as u8; 7]).collect();
            let (root, proofs) = proofs_from_bytes_list(&items);
            assert_eq!(root, hash_from_bytes_list(&items));
            for (i, proof) in proofs.iter().enumerate() {
                assert!(proof.verify(&root, &items[i]), "size {} index {}", n, i);
                // wrong leaf must fail
                assert!(!proof.verify(&root, b"not the leaf"));
            }
        }
    }

    #[test]
    fn tampered_proof_fails() {
        let items: Vec<Vec<u8>> = (0..4).map(|i| vec![i as u8; 3]).collect();
        let (root, mut proofs) = proofs_from_bytes_list(&items);
        proofs[2].aunts[0] = Hash::compute_from(b"bogus");
        assert!(!proofs[2].verify(&root, &items[2]));
    }

    #[test]
    fn proof_serialization_roundtrip() {
        use nom::error::VerboseError;
        let items: Vec<Vec<u8>> = (0..5).map(|i| vec![i as u8; 11]).collect();
        let (_, proofs) = proofs_from_bytes_list(&items);
        let serializer = ProofSerializer::new();
        let deserializer = ProofDeserializer::new();
        for proof in proofs {
            let mut buffer = Vec::new();
            serializer.serialize(&proof, &mut buffer).unwrap();
            let (rest, decoded) = deserializer
                .deserialize::<VerboseError<&[u8]>>(&buffer)
                .unwrap();
            assert!(rest.is_empty());
            assert_eq!(decoded, proof);
        }
    }
}
