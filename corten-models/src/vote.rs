//! Votes and commits. Canonical signing payloads are bit-exact with the
//! Tendermint 0.35 canonical-vote protobuf so that signatures interoperate.

use crate::address::{Address, AddressDeserializer, AddressSerializer};
use crate::bit_array::BitArray;
use crate::block_id::{BlockId, BlockIdDeserializer, BlockIdSerializer};
use crate::error::ModelsError;
use crate::{Height, Round};
use corten_hash::{merkle, Hash};
use corten_serialization::{
    proto, Deserializer, I64VarIntDeserializer, I64VarIntSerializer, SerializeError, Serializer,
    U32VarIntDeserializer, U32VarIntSerializer, U64VarIntDeserializer, U64VarIntSerializer,
};
use corten_signature::{
    KeyPair, PublicKey, Signature, SignatureDeserializer, SIGNATURE_SIZE_BYTES,
};
use corten_time::{Timestamp, TimestampDeserializer, TimestampSerializer};
use nom::{
    error::{context, ContextError, ParseError},
    multi::length_count,
    sequence::tuple,
    IResult, Parser,
};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::ops::Bound::Included;

/// Message types that validators sign.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive,
    serde::Serialize, serde::Deserialize,
)]
#[repr(u8)]
pub enum SignedMsgType {
    /// First voting phase of a round.
    Prevote = 1,
    /// Second voting phase of a round.
    Precommit = 2,
    /// Block proposal.
    Proposal = 32,
}

impl SignedMsgType {
    /// True for the two vote phases.
    pub fn is_vote_type(&self) -> bool {
        matches!(self, SignedMsgType::Prevote | SignedMsgType::Precommit)
    }
}

impl std::fmt::Display for SignedMsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SignedMsgType::Prevote => write!(f, "prevote"),
            SignedMsgType::Precommit => write!(f, "precommit"),
            SignedMsgType::Proposal => write!(f, "proposal"),
        }
    }
}

/// A prevote or precommit from one validator.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Vote {
    /// Prevote or precommit.
    pub vote_type: SignedMsgType,
    /// Height the vote belongs to.
    pub height: Height,
    /// Round the vote belongs to.
    pub round: Round,
    /// Voted block, or [`BlockId::ZERO`] for nil.
    pub block_id: BlockId,
    /// Claimed signing time.
    pub timestamp: Timestamp,
    /// Address of the voting validator.
    pub validator_address: Address,
    /// Index of the voting validator in the validator set.
    pub validator_index: i32,
    /// Ed25519 signature over the canonical payload.
    pub signature: Signature,
}

impl Vote {
    /// Canonical signing payload: varint length prefix followed by the
    /// canonical-vote protobuf body.
    pub fn sign_bytes(&self, chain_id: &str) -> Vec<u8> {
        let mut body = Vec::new();
        proto::write_varint_field(1, u8::from(self.vote_type) as u64, &mut body);
        proto::write_sfixed64_field(2, self.height, &mut body);
        proto::write_sfixed64_field(3, self.round as i64, &mut body);
        if !self.block_id.is_zero() {
            proto::write_message_field(4, &self.block_id.canonical_bytes(), &mut body);
        }
        let (seconds, nanos) = self.timestamp.seconds_nanos();
        proto::write_timestamp_field(5, seconds, nanos, &mut body);
        proto::write_bytes_field(6, chain_id.as_bytes(), &mut body);

        let mut payload = Vec::with_capacity(body.len() + 2);
        proto::write_uvarint(body.len() as u64, &mut payload);
        payload.extend_from_slice(&body);
        payload
    }

    /// Sign the canonical payload, filling the signature slot.
    pub fn sign(&mut self, chain_id: &str, keypair: &KeyPair) {
        self.signature = keypair.sign(&self.sign_bytes(chain_id));
    }

    /// Verify the signature against a validator public key.
    pub fn verify(&self, chain_id: &str, public_key: &PublicKey) -> Result<(), ModelsError> {
        if Address::from_public_key(public_key) != self.validator_address {
            return Err(ModelsError::InvalidVote(
                "vote signer address mismatch".into(),
            ));
        }
        public_key
            .verify(&self.sign_bytes(chain_id), &self.signature)
            .map_err(|err| ModelsError::InvalidVote(format!("bad signature: {}", err)))
    }

    /// Structural checks independent of the validator set.
    pub fn validate_basic(&self) -> Result<(), ModelsError> {
        if !self.vote_type.is_vote_type() {
            return Err(ModelsError::InvalidVote("invalid vote type".into()));
        }
        if self.height < 0 {
            return Err(ModelsError::InvalidVote("negative height".into()));
        }
        if self.round < 0 {
            return Err(ModelsError::InvalidVote("negative round".into()));
        }
        if self.validator_index < 0 {
            return Err(ModelsError::InvalidVote("negative validator index".into()));
        }
        if !self.block_id.is_zero() && !self.block_id.is_complete() {
            return Err(ModelsError::InvalidVote(
                "block id must be nil or complete".into(),
            ));
        }
        Ok(())
    }

    /// Convert into the commit signature slot form.
    pub fn to_commit_sig(&self) -> Result<CommitSig, ModelsError> {
        let flag = if self.block_id.is_complete() {
            BlockIdFlag::Commit
        } else if self.block_id.is_zero() {
            BlockIdFlag::Nil
        } else {
            return Err(ModelsError::InvalidVote(
                "expected block id to be either nil or complete".into(),
            ));
        };
        Ok(CommitSig {
            flag,
            validator_address: self.validator_address,
            timestamp: self.timestamp,
            signature: Some(self.signature),
        })
    }
}

impl std::fmt::Display for Vote {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Vote({} {}/{} {} by {}[{}])",
            self.vote_type,
            self.height,
            self.round,
            if self.block_id.is_zero() {
                "nil".to_string()
            } else {
                self.block_id.hash.to_string()
            },
            self.validator_address,
            self.validator_index,
        )
    }
}

/// Per-validator signature slot inside a commit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, IntoPrimitive, TryFromPrimitive,
    serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum BlockIdFlag {
    /// The validator did not vote.
    Absent = 1,
    /// The validator voted for the committed block.
    Commit = 2,
    /// The validator voted nil.
    Nil = 3,
}

/// One slot of a commit: flag, address, time, and signature.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CommitSig {
    /// What the validator signed, if anything.
    pub flag: BlockIdFlag,
    /// Validator address, zeroed when absent.
    pub validator_address: Address,
    /// Vote timestamp, zero when absent.
    pub timestamp: Timestamp,
    /// Vote signature, absent when the validator did not vote.
    pub signature: Option<Signature>,
}

impl CommitSig {
    /// The absent slot.
    pub fn absent() -> Self {
        CommitSig {
            flag: BlockIdFlag::Absent,
            validator_address: Address::from_bytes(&[0u8; 20]),
            timestamp: Timestamp::ZERO,
            signature: None,
        }
    }

    /// True when the validator did not vote.
    pub fn is_absent(&self) -> bool {
        self.flag == BlockIdFlag::Absent
    }

    /// True when the slot carries a vote for the committed block.
    pub fn for_block(&self) -> bool {
        self.flag == BlockIdFlag::Commit
    }

    /// The block id this slot's vote bound: the commit's id for `Commit`,
    /// nil otherwise.
    pub fn block_id(&self, commit_block_id: &BlockId) -> BlockId {
        match self.flag {
            BlockIdFlag::Commit => *commit_block_id,
            _ => BlockId::ZERO,
        }
    }
}

/// +2/3 precommits for one block at one height and round.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Commit {
    /// Committed height.
    pub height: Height,
    /// Round the commit was formed in.
    pub round: Round,
    /// The committed block.
    pub block_id: BlockId,
    /// One slot per validator of the committing set, in validator order.
    pub signatures: Vec<CommitSig>,
}

impl Commit {
    /// An empty commit (used before the first height).
    pub fn empty() -> Self {
        Commit {
            height: 0,
            round: 0,
            block_id: BlockId::ZERO,
            signatures: Vec::new(),
        }
    }

    /// Number of signature slots.
    pub fn size(&self) -> usize {
        self.signatures.len()
    }

    /// Rebuild the vote a slot stands for, for signature verification and
    /// last-commit gossip.
    pub fn get_vote(&self, index: usize) -> Option<Vote> {
        let sig = self.signatures.get(index)?;
        Some(Vote {
            vote_type: SignedMsgType::Precommit,
            height: self.height,
            round: self.round,
            block_id: sig.block_id(&self.block_id),
            timestamp: sig.timestamp,
            validator_address: sig.validator_address,
            validator_index: index as i32,
            signature: sig.signature.unwrap_or_else(|| {
                Signature::from_bytes(&[0u8; SIGNATURE_SIZE_BYTES])
            }),
        })
    }

    /// Bit array of non-absent slots.
    pub fn bit_array(&self) -> BitArray {
        let mut bits = BitArray::new(self.signatures.len());
        for (index, sig) in self.signatures.iter().enumerate() {
            bits.set_index(index, !sig.is_absent());
        }
        bits
    }

    /// Merkle root over the encoded signature slots, committed into the next
    /// header's `last_commit_hash`.
    pub fn hash(&self) -> Hash {
        let serializer = CommitSigSerializer::new();
        let leaves: Vec<Vec<u8>> = self
            .signatures
            .iter()
            .map(|sig| {
                serializer
                    .serialize_to_vec(sig)
                    .expect("commit sig serialization cannot fail")
            })
            .collect();
        merkle::hash_from_bytes_list(&leaves)
    }
}

/// Serializer for [`Vote`].
#[derive(Clone, Default)]
pub struct VoteSerializer {
    i64_serializer: I64VarIntSerializer,
    u32_serializer: U32VarIntSerializer,
    block_id_serializer: BlockIdSerializer,
    timestamp_serializer: TimestampSerializer,
    address_serializer: AddressSerializer,
}

impl VoteSerializer {
    /// Create a vote serializer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Serializer<Vote> for VoteSerializer {
    fn serialize(&self, value: &Vote, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        buffer.push(u8::from(value.vote_type));
        self.i64_serializer.serialize(&value.height, buffer)?;
        self.u32_serializer
            .serialize(&(value.round as u32), buffer)?;
        self.block_id_serializer.serialize(&value.block_id, buffer)?;
        self.timestamp_serializer
            .serialize(&value.timestamp, buffer)?;
        self.address_serializer
            .serialize(&value.validator_address, buffer)?;
        self.u32_serializer
            .serialize(&(value.validator_index as u32), buffer)?;
        buffer.extend_from_slice(&value.signature.to_bytes());
        Ok(())
    }
}

/// Deserializer for [`Vote`].
#[derive(Clone)]
pub struct VoteDeserializer {
    i64_deserializer: I64VarIntDeserializer,
    u32_deserializer: U32VarIntDeserializer,
    block_id_deserializer: BlockIdDeserializer,
    timestamp_deserializer: TimestampDeserializer,
    address_deserializer: AddressDeserializer,
    signature_deserializer: SignatureDeserializer,
}

impl VoteDeserializer {
    /// Create a vote deserializer.
    pub fn new() -> Self {
        Self {
            i64_deserializer: I64VarIntDeserializer::new(),
            u32_deserializer: U32VarIntDeserializer::new(Included(0), Included(u32::MAX)),
            block_id_deserializer: BlockIdDeserializer::new(),
            timestamp_deserializer: TimestampDeserializer::new(),
            address_deserializer: AddressDeserializer::new(),
            signature_deserializer: SignatureDeserializer::new(),
        }
    }
}

impl Default for VoteDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<Vote> for VoteDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Vote, E> {
        context("Failed vote deserialization", |input: &'a [u8]| {
            let (rest, raw_type) = nom::number::complete::be_u8(input)?;
            let vote_type = SignedMsgType::try_from(raw_type).map_err(|_| {
                nom::Err::Error(ParseError::from_error_kind(
                    input,
                    nom::error::ErrorKind::Tag,
                ))
            })?;
            let (rest, height) = self.i64_deserializer.deserialize(rest)?;
            let (rest, round) = self.u32_deserializer.deserialize(rest)?;
            let (rest, block_id) = self.block_id_deserializer.deserialize(rest)?;
            let (rest, timestamp) = self.timestamp_deserializer.deserialize(rest)?;
            let (rest, validator_address) = self.address_deserializer.deserialize(rest)?;
            let (rest, validator_index) = self.u32_deserializer.deserialize(rest)?;
            let (rest, signature) = self.signature_deserializer.deserialize(rest)?;
            Ok((
                rest,
                Vote {
                    vote_type,
                    height,
                    round: round as Round,
                    block_id,
                    timestamp,
                    validator_address,
                    validator_index: validator_index as i32,
                    signature,
                },
            ))
        })(buffer)
    }
}

/// Serializer for [`CommitSig`].
#[derive(Clone, Default)]
pub struct CommitSigSerializer {
    timestamp_serializer: TimestampSerializer,
    address_serializer: AddressSerializer,
}

impl CommitSigSerializer {
    /// Create a commit signature serializer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Serializer<CommitSig> for CommitSigSerializer {
    fn serialize(&self, value: &CommitSig, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        buffer.push(u8::from(value.flag));
        self.address_serializer
            .serialize(&value.validator_address, buffer)?;
        self.timestamp_serializer
            .serialize(&value.timestamp, buffer)?;
        match &value.signature {
            Some(signature) => {
                buffer.push(1);
                buffer.extend_from_slice(&signature.to_bytes());
            }
            None => buffer.push(0),
        }
        Ok(())
    }
}

/// Deserializer for [`CommitSig`].
#[derive(Clone, Default)]
pub struct CommitSigDeserializer {
    timestamp_deserializer: TimestampDeserializer,
    address_deserializer: AddressDeserializer,
    signature_deserializer: SignatureDeserializer,
}

impl CommitSigDeserializer {
    /// Create a commit signature deserializer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Deserializer<CommitSig> for CommitSigDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], CommitSig, E> {
        context("Failed commit sig deserialization", |input: &'a [u8]| {
            let (rest, raw_flag) = nom::number::complete::be_u8(input)?;
            let flag = BlockIdFlag::try_from(raw_flag).map_err(|_| {
                nom::Err::Error(ParseError::from_error_kind(
                    input,
                    nom::error::ErrorKind::Tag,
                ))
            })?;
            let (rest, validator_address) = self.address_deserializer.deserialize(rest)?;
            let (rest, timestamp) = self.timestamp_deserializer.deserialize(rest)?;
            let (rest, has_signature) = nom::number::complete::be_u8(rest)?;
            let (rest, signature) = match has_signature {
                0 => (rest, None),
                1 => {
                    let (rest, signature) = self.signature_deserializer.deserialize(rest)?;
                    (rest, Some(signature))
                }
                _ => {
                    return Err(nom::Err::Error(ParseError::from_error_kind(
                        input,
                        nom::error::ErrorKind::Tag,
                    )))
                }
            };
            Ok((
                rest,
                CommitSig {
                    flag,
                    validator_address,
                    timestamp,
                    signature,
                },
            ))
        })(buffer)
    }
}

/// Serializer for [`Commit`].
#[derive(Clone, Default)]
pub struct CommitSerializer {
    i64_serializer: I64VarIntSerializer,
    u32_serializer: U32VarIntSerializer,
    u64_serializer: U64VarIntSerializer,
    block_id_serializer: BlockIdSerializer,
    sig_serializer: CommitSigSerializer,
}

impl CommitSerializer {
    /// Create a commit serializer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Serializer<Commit> for CommitSerializer {
    fn serialize(&self, value: &Commit, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.i64_serializer.serialize(&value.height, buffer)?;
        self.u32_serializer
            .serialize(&(value.round as u32), buffer)?;
        self.block_id_serializer.serialize(&value.block_id, buffer)?;
        self.u64_serializer
            .serialize(&(value.signatures.len() as u64), buffer)?;
        for sig in &value.signatures {
            self.sig_serializer.serialize(sig, buffer)?;
        }
        Ok(())
    }
}

/// Deserializer for [`Commit`].
#[derive(Clone)]
pub struct CommitDeserializer {
    i64_deserializer: I64VarIntDeserializer,
    u32_deserializer: U32VarIntDeserializer,
    sig_count_deserializer: U64VarIntDeserializer,
    block_id_deserializer: BlockIdDeserializer,
    sig_deserializer: CommitSigDeserializer,
}

impl CommitDeserializer {
    /// Create a commit deserializer accepting at most `max_validators` slots.
    pub fn new(max_validators: u64) -> Self {
        Self {
            i64_deserializer: I64VarIntDeserializer::new(),
            u32_deserializer: U32VarIntDeserializer::new(Included(0), Included(u32::MAX)),
            sig_count_deserializer: U64VarIntDeserializer::new(
                Included(0),
                Included(max_validators),
            ),
            block_id_deserializer: BlockIdDeserializer::new(),
            sig_deserializer: CommitSigDeserializer::new(),
        }
    }
}

impl Deserializer<Commit> for CommitDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Commit, E> {
        context(
            "Failed commit deserialization",
            tuple((
                context("Failed height deserialization", |input| {
                    self.i64_deserializer.deserialize(input)
                }),
                context("Failed round deserialization", |input| {
                    self.u32_deserializer.deserialize(input)
                }),
                context("Failed block id deserialization", |input| {
                    self.block_id_deserializer.deserialize(input)
                }),
                length_count(
                    context("Failed signature count deserialization", |input| {
                        self.sig_count_deserializer.deserialize(input)
                    }),
                    context("Failed signature deserialization", |input| {
                        self.sig_deserializer.deserialize(input)
                    }),
                ),
            )),
        )
        .map(|(height, round, block_id, signatures)| Commit {
            height,
            round: round as Round,
            block_id,
            signatures,
        })
        .parse(buffer)
    }
}
