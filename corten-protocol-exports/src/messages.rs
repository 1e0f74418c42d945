//! Wire messages of the gossip channels. Each channel carries one tagged
//! enum; logical messages are the unit the network layer reassembles.

use corten_consensus_exports::RoundStep;
use corten_models::bit_array::{BitArray, BitArrayDeserializer, BitArraySerializer};
use corten_models::block::{Block, BlockDeserializer, BlockSerializer};
use corten_models::block_id::{
    BlockId, BlockIdDeserializer, BlockIdSerializer, PartSetHeader, PartSetHeaderDeserializer,
    PartSetHeaderSerializer,
};
use corten_models::evidence::{Evidence, EvidenceDeserializer, EvidenceSerializer};
use corten_models::part_set::{Part, PartDeserializer, PartSerializer};
use corten_models::proposal::{Proposal, ProposalDeserializer, ProposalSerializer};
use corten_models::vote::{SignedMsgType, Vote, VoteDeserializer, VoteSerializer};
use corten_models::{block::Tx, Height, Round};
use corten_serialization::{
    Deserializer, I64VarIntDeserializer, I64VarIntSerializer, SerializeError, Serializer,
    U32VarIntDeserializer, U32VarIntSerializer, VecU8Deserializer, VecU8Serializer,
};
use nom::error::{context, ContextError, ParseError};
use nom::IResult;
use std::ops::Bound::Included;

const MAX_VOTE_BITS: u32 = 1 << 16;

fn step_to_u8(step: RoundStep) -> u8 {
    match step {
        RoundStep::NewHeight => 1,
        RoundStep::NewRound => 2,
        RoundStep::Propose => 3,
        RoundStep::Prevote => 4,
        RoundStep::PrevoteWait => 5,
        RoundStep::Precommit => 6,
        RoundStep::PrecommitWait => 7,
        RoundStep::Commit => 8,
    }
}

fn step_from_u8(raw: u8) -> Option<RoundStep> {
    Some(match raw {
        1 => RoundStep::NewHeight,
        2 => RoundStep::NewRound,
        3 => RoundStep::Propose,
        4 => RoundStep::Prevote,
        5 => RoundStep::PrevoteWait,
        6 => RoundStep::Precommit,
        7 => RoundStep::PrecommitWait,
        8 => RoundStep::Commit,
        _ => return None,
    })
}

/// Messages of the state channel.
#[derive(Debug, Clone, PartialEq)]
pub enum StateMessage {
    /// Round progress of the sender.
    NewRoundStep {
        /// Sender's height.
        height: Height,
        /// Sender's round.
        round: Round,
        /// Sender's step.
        step: RoundStep,
        /// Seconds since the sender's height started.
        seconds_since_start_time: i64,
        /// Round of the sender's last commit.
        last_commit_round: Round,
    },
    /// The sender saw +2/3 prevotes for a block.
    NewValidBlock {
        /// Height of the block.
        height: Height,
        /// Round it was seen in.
        round: Round,
        /// Part-set header of the block.
        parts_header: PartSetHeader,
        /// Parts the sender holds.
        parts: BitArray,
        /// True once committed.
        is_commit: bool,
    },
    /// The sender accepted a vote.
    HasVote {
        /// Height of the vote.
        height: Height,
        /// Round of the vote.
        round: Round,
        /// Prevote or precommit.
        vote_type: SignedMsgType,
        /// Validator index of the vote.
        index: i32,
    },
    /// The sender claims +2/3 for a block id.
    VoteSetMaj23 {
        /// Claimed height.
        height: Height,
        /// Claimed round.
        round: Round,
        /// Claimed vote type.
        vote_type: SignedMsgType,
        /// Claimed block id.
        block_id: BlockId,
    },
}

/// Messages of the data channel.
#[derive(Debug, Clone, PartialEq)]
pub enum DataMessage {
    /// A signed proposal.
    Proposal(Proposal),
    /// The prevote bit array of the proposal's POL round.
    ProposalPol {
        /// Height of the proposal.
        height: Height,
        /// The POL round.
        proposal_pol_round: Round,
        /// Which prevotes the sender holds.
        proposal_pol: BitArray,
    },
    /// One block part.
    BlockPart {
        /// Height of the part.
        height: Height,
        /// Round of the part.
        round: Round,
        /// The part.
        part: Part,
    },
}

/// Messages of the vote channel.
#[derive(Debug, Clone, PartialEq)]
pub enum VoteChannelMessage {
    /// A signed vote.
    Vote(Vote),
}

/// Messages of the vote-set-bits channel.
#[derive(Debug, Clone, PartialEq)]
pub enum VoteSetBitsMessage {
    /// Which votes of a (height, round, type, block id) the sender holds.
    VoteSetBits {
        /// Queried height.
        height: Height,
        /// Queried round.
        round: Round,
        /// Queried vote type.
        vote_type: SignedMsgType,
        /// Queried block id.
        block_id: BlockId,
        /// The sender's bit array.
        votes: BitArray,
    },
}

/// Messages of the block-sync channel.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockSyncMessage {
    /// Ask for the peer's stored range.
    StatusRequest,
    /// The sender's stored range.
    StatusResponse {
        /// First stored height.
        base: Height,
        /// Last stored height.
        height: Height,
    },
    /// Ask for one block.
    BlockRequest {
        /// Requested height.
        height: Height,
    },
    /// A requested block.
    BlockResponse {
        /// The block.
        block: Box<Block>,
    },
    /// The sender does not have the requested block.
    NoBlockResponse {
        /// Requested height.
        height: Height,
    },
}

/// Messages of the evidence channel.
#[derive(Debug, Clone, PartialEq)]
pub enum EvidenceMessage {
    /// One piece of evidence.
    Evidence(Box<Evidence>),
}

/// Messages of the mempool channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MempoolMessage {
    /// One raw transaction.
    Tx(Tx),
}

macro_rules! tagged_codec {
    ($name:ident, $ser:ident, $deser:ident) => {
        #[doc = concat!("Serializer for [`", stringify!($name), "`].")]
        #[derive(Clone, Default)]
        pub struct $ser;

        impl $ser {
            #[doc = "Create the serializer."]
            pub fn new() -> Self {
                Self
            }
        }

        #[doc = concat!("Deserializer for [`", stringify!($name), "`].")]
        #[derive(Clone, Default)]
        pub struct $deser;

        impl $deser {
            #[doc = "Create the deserializer."]
            pub fn new() -> Self {
                Self
            }
        }
    };
}

tagged_codec!(StateMessage, StateMessageSerializer, StateMessageDeserializer);
tagged_codec!(DataMessage, DataMessageSerializer, DataMessageDeserializer);
tagged_codec!(
    VoteChannelMessage,
    VoteChannelMessageSerializer,
    VoteChannelMessageDeserializer
);
tagged_codec!(
    VoteSetBitsMessage,
    VoteSetBitsMessageSerializer,
    VoteSetBitsMessageDeserializer
);
tagged_codec!(
    BlockSyncMessage,
    BlockSyncMessageSerializer,
    BlockSyncMessageDeserializer
);
tagged_codec!(
    EvidenceMessage,
    EvidenceMessageSerializer,
    EvidenceMessageDeserializer
);
tagged_codec!(
    MempoolMessage,
    MempoolMessageSerializer,
    MempoolMessageDeserializer
);

fn fail<'a, E: ParseError<&'a [u8]>>(input: &'a [u8]) -> nom::Err<E> {
    nom::Err::Error(ParseError::from_error_kind(
        input,
        nom::error::ErrorKind::Tag,
    ))
}

fn read_vote_type<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
    input: &'a [u8],
) -> IResult<&'a [u8], SignedMsgType, E> {
    let (rest, raw) = nom::number::complete::be_u8(input)?;
    let vote_type = SignedMsgType::try_from(raw).map_err(|_| fail(input))?;
    if !vote_type.is_vote_type() {
        return Err(fail(input));
    }
    Ok((rest, vote_type))
}

impl Serializer<StateMessage> for StateMessageSerializer {
    fn serialize(&self, value: &StateMessage, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        let i64_serializer = I64VarIntSerializer::new();
        let u32_serializer = U32VarIntSerializer::new();
        match value {
            StateMessage::NewRoundStep {
                height,
                round,
                step,
                seconds_since_start_time,
                last_commit_round,
            } => {
                buffer.push(1);
                i64_serializer.serialize(height, buffer)?;
                u32_serializer.serialize(&(*round as u32), buffer)?;
                buffer.push(step_to_u8(*step));
                i64_serializer.serialize(seconds_since_start_time, buffer)?;
                i64_serializer.serialize(&(*last_commit_round as i64), buffer)?;
            }
            StateMessage::NewValidBlock {
                height,
                round,
                parts_header,
                parts,
                is_commit,
            } => {
                buffer.push(2);
                i64_serializer.serialize(height, buffer)?;
                u32_serializer.serialize(&(*round as u32), buffer)?;
                PartSetHeaderSerializer::new().serialize(parts_header, buffer)?;
                BitArraySerializer::new().serialize(parts, buffer)?;
                buffer.push(*is_commit as u8);
            }
            StateMessage::HasVote {
                height,
                round,
                vote_type,
                index,
            } => {
                buffer.push(3);
                i64_serializer.serialize(height, buffer)?;
                u32_serializer.serialize(&(*round as u32), buffer)?;
                buffer.push(u8::from(*vote_type));
                u32_serializer.serialize(&(*index as u32), buffer)?;
            }
            StateMessage::VoteSetMaj23 {
                height,
                round,
                vote_type,
                block_id,
            } => {
                buffer.push(4);
                i64_serializer.serialize(height, buffer)?;
                u32_serializer.serialize(&(*round as u32), buffer)?;
                buffer.push(u8::from(*vote_type));
                BlockIdSerializer::new().serialize(block_id, buffer)?;
            }
        }
        Ok(())
    }
}

impl Deserializer<StateMessage> for StateMessageDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], StateMessage, E> {
        context("Failed state message deserialization", |input: &'a [u8]| {
            let i64_deserializer = I64VarIntDeserializer::new();
            let u32_deserializer = U32VarIntDeserializer::new(Included(0), Included(u32::MAX));
            let (rest, tag) = nom::number::complete::be_u8(input)?;
            match tag {
                1 => {
                    let (rest, height) = i64_deserializer.deserialize(rest)?;
                    let (rest, round) = u32_deserializer.deserialize(rest)?;
                    let (rest, raw_step) = nom::number::complete::be_u8(rest)?;
                    let step = step_from_u8(raw_step).ok_or_else(|| fail(input))?;
                    let (rest, seconds) = i64_deserializer.deserialize(rest)?;
                    let (rest, last_commit_round) = i64_deserializer.deserialize(rest)?;
                    Ok((
                        rest,
                        StateMessage::NewRoundStep {
                            height,
                            round: round as Round,
                            step,
                            seconds_since_start_time: seconds,
                            last_commit_round: last_commit_round as Round,
                        },
                    ))
                }
                2 => {
                    let (rest, height) = i64_deserializer.deserialize(rest)?;
                    let (rest, round) = u32_deserializer.deserialize(rest)?;
                    let (rest, parts_header) =
                        PartSetHeaderDeserializer::new().deserialize(rest)?;
                    let (rest, parts) =
                        BitArrayDeserializer::new(MAX_VOTE_BITS).deserialize(rest)?;
                    let (rest, raw_commit) = nom::number::complete::be_u8(rest)?;
                    Ok((
                        rest,
                        StateMessage::NewValidBlock {
                            height,
                            round: round as Round,
                            parts_header,
                            parts,
                            is_commit: raw_commit != 0,
                        },
                    ))
                }
                3 => {
                    let (rest, height) = i64_deserializer.deserialize(rest)?;
                    let (rest, round) = u32_deserializer.deserialize(rest)?;
                    let (rest, vote_type) = read_vote_type(rest)?;
                    let (rest, index) = u32_deserializer.deserialize(rest)?;
                    Ok((
                        rest,
                        StateMessage::HasVote {
                            height,
                            round: round as Round,
                            vote_type,
                            index: index as i32,
                        },
                    ))
                }
                4 => {
                    let (rest, height) = i64_deserializer.deserialize(rest)?;
                    let (rest, round) = u32_deserializer.deserialize(rest)?;
                    let (rest, vote_type) = read_vote_type(rest)?;
                    let (rest, block_id) = BlockIdDeserializer::new().deserialize(rest)?;
                    Ok((
                        rest,
                        StateMessage::VoteSetMaj23 {
                            height,
                            round: round as Round,
                            vote_type,
                            block_id,
                        },
                    ))
                }
                _ => Err(fail(input)),
            }
        })(buffer)
    }
}

impl Serializer<DataMessage> for DataMessageSerializer {
    fn serialize(&self, value: &DataMessage, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        let i64_serializer = I64VarIntSerializer::new();
        let u32_serializer = U32VarIntSerializer::new();
        match value {
            DataMessage::Proposal(proposal) => {
                buffer.push(1);
                ProposalSerializer::new().serialize(proposal, buffer)?;
            }
            DataMessage::ProposalPol {
                height,
                proposal_pol_round,
                proposal_pol,
            } => {
                buffer.push(2);
                i64_serializer.serialize(height, buffer)?;
                u32_serializer.serialize(&(*proposal_pol_round as u32), buffer)?;
                BitArraySerializer::new().serialize(proposal_pol, buffer)?;
            }
            DataMessage::BlockPart {
                height,
                round,
                part,
            } => {
                buffer.push(3);
                i64_serializer.serialize(height, buffer)?;
                u32_serializer.serialize(&(*round as u32), buffer)?;
                PartSerializer::new().serialize(part, buffer)?;
            }
        }
        Ok(())
    }
}

impl Deserializer<DataMessage> for DataMessageDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], DataMessage, E> {
        context("Failed data message deserialization", |input: &'a [u8]| {
            let i64_deserializer = I64VarIntDeserializer::new();
            let u32_deserializer = U32VarIntDeserializer::new(Included(0), Included(u32::MAX));
            let (rest, tag) = nom::number::complete::be_u8(input)?;
            match tag {
                1 => {
                    let (rest, proposal) = ProposalDeserializer::new().deserialize(rest)?;
                    Ok((rest, DataMessage::Proposal(proposal)))
                }
                2 => {
                    let (rest, height) = i64_deserializer.deserialize(rest)?;
                    let (rest, round) = u32_deserializer.deserialize(rest)?;
                    let (rest, proposal_pol) =
                        BitArrayDeserializer::new(MAX_VOTE_BITS).deserialize(rest)?;
                    Ok((
                        rest,
                        DataMessage::ProposalPol {
                            height,
                            proposal_pol_round: round as Round,
                            proposal_pol,
                        },
                    ))
                }
                3 => {
                    let (rest, height) = i64_deserializer.deserialize(rest)?;
                    let (rest, round) = u32_deserializer.deserialize(rest)?;
                    let (rest, part) = PartDeserializer::new().deserialize(rest)?;
                    Ok((
                        rest,
                        DataMessage::BlockPart {
                            height,
                            round: round as Round,
                            part,
                        },
                    ))
                }
                _ => Err(fail(input)),
            }
        })(buffer)
    }
}

impl Serializer<VoteChannelMessage> for VoteChannelMessageSerializer {
    fn serialize(
        &self,
        value: &VoteChannelMessage,
        buffer: &mut Vec<u8>,
    ) -> Result<(), SerializeError> {
        match value {
            VoteChannelMessage::Vote(vote) => {
                buffer.push(1);
                VoteSerializer::new().serialize(vote, buffer)
            }
        }
    }
}

impl Deserializer<VoteChannelMessage> for VoteChannelMessageDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], VoteChannelMessage, E> {
        context("Failed vote message deserialization", |input: &'a [u8]| {
            let (rest, tag) = nom::number::complete::be_u8(input)?;
            match tag {
                1 => {
                    let (rest, vote) = VoteDeserializer::new().deserialize(rest)?;
                    Ok((rest, VoteChannelMessage::Vote(vote)))
                }
                _ => Err(fail(input)),
            }
        })(buffer)
    }
}

impl Serializer<VoteSetBitsMessage> for VoteSetBitsMessageSerializer {
    fn serialize(
        &self,
        value: &VoteSetBitsMessage,
        buffer: &mut Vec<u8>,
    ) -> Result<(), SerializeError> {
        match value {
            VoteSetBitsMessage::VoteSetBits {
                height,
                round,
                vote_type,
                block_id,
                votes,
            } => {
                buffer.push(1);
                I64VarIntSerializer::new().serialize(height, buffer)?;
                U32VarIntSerializer::new().serialize(&(*round as u32), buffer)?;
                buffer.push(u8::from(*vote_type));
                BlockIdSerializer::new().serialize(block_id, buffer)?;
                BitArraySerializer::new().serialize(votes, buffer)
            }
        }
    }
}

impl Deserializer<VoteSetBitsMessage> for VoteSetBitsMessageDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], VoteSetBitsMessage, E> {
        context(
            "Failed vote-set-bits message deserialization",
            |input: &'a [u8]| {
                let (rest, tag) = nom::number::complete::be_u8(input)?;
                if tag != 1 {
                    return Err(fail(input));
                }
                let (rest, height) = I64VarIntDeserializer::new().deserialize(rest)?;
                let (rest, round) = U32VarIntDeserializer::new(Included(0), Included(u32::MAX))
                    .deserialize(rest)?;
                let (rest, vote_type) = read_vote_type(rest)?;
                let (rest, block_id) = BlockIdDeserializer::new().deserialize(rest)?;
                let (rest, votes) = BitArrayDeserializer::new(MAX_VOTE_BITS).deserialize(rest)?;
                Ok((
                    rest,
                    VoteSetBitsMessage::VoteSetBits {
                        height,
                        round: round as Round,
                        vote_type,
                        block_id,
                        votes,
                    },
                ))
            },
        )(buffer)
    }
}

impl Serializer<BlockSyncMessage> for BlockSyncMessageSerializer {
    fn serialize(
        &self,
        value: &BlockSyncMessage,
        buffer: &mut Vec<u8>,
    ) -> Result<(), SerializeError> {
        let i64_serializer = I64VarIntSerializer::new();
        match value {
            BlockSyncMessage::StatusRequest => buffer.push(1),
            BlockSyncMessage::StatusResponse { base, height } => {
                buffer.push(2);
                i64_serializer.serialize(base, buffer)?;
                i64_serializer.serialize(height, buffer)?;
            }
            BlockSyncMessage::BlockRequest { height } => {
                buffer.push(3);
                i64_serializer.serialize(height, buffer)?;
            }
            BlockSyncMessage::BlockResponse { block } => {
                buffer.push(4);
                BlockSerializer::new().serialize(block, buffer)?;
            }
            BlockSyncMessage::NoBlockResponse { height } => {
                buffer.push(5);
                i64_serializer.serialize(height, buffer)?;
            }
        }
        Ok(())
    }
}

impl Deserializer<BlockSyncMessage> for BlockSyncMessageDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], BlockSyncMessage, E> {
        context(
            "Failed block-sync message deserialization",
            |input: &'a [u8]| {
                let i64_deserializer = I64VarIntDeserializer::new();
                let (rest, tag) = nom::number::complete::be_u8(input)?;
                match tag {
                    1 => Ok((rest, BlockSyncMessage::StatusRequest)),
                    2 => {
                        let (rest, base) = i64_deserializer.deserialize(rest)?;
                        let (rest, height) = i64_deserializer.deserialize(rest)?;
                        Ok((rest, BlockSyncMessage::StatusResponse { base, height }))
                    }
                    3 => {
                        let (rest, height) = i64_deserializer.deserialize(rest)?;
                        Ok((rest, BlockSyncMessage::BlockRequest { height }))
                    }
                    4 => {
                        let (rest, block) = BlockDeserializer::new().deserialize(rest)?;
                        Ok((
                            rest,
                            BlockSyncMessage::BlockResponse {
                                block: Box::new(block),
                            },
                        ))
                    }
                    5 => {
                        let (rest, height) = i64_deserializer.deserialize(rest)?;
                        Ok((rest, BlockSyncMessage::NoBlockResponse { height }))
                    }
                    _ => Err(fail(input)),
                }
            },
        )(buffer)
    }
}

impl Serializer<EvidenceMessage> for EvidenceMessageSerializer {
    fn serialize(
        &self,
        value: &EvidenceMessage,
        buffer: &mut Vec<u8>,
    ) -> Result<(), SerializeError> {
        match value {
            EvidenceMessage::Evidence(evidence) => {
                buffer.push(1);
                EvidenceSerializer::new().serialize(evidence, buffer)
            }
        }
    }
}

impl Deserializer<EvidenceMessage> for EvidenceMessageDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], EvidenceMessage, E> {
        context(
            "Failed evidence message deserialization",
            |input: &'a [u8]| {
                let (rest, tag) = nom::number::complete::be_u8(input)?;
                if tag != 1 {
                    return Err(fail(input));
                }
                let (rest, evidence) = EvidenceDeserializer::new().deserialize(rest)?;
                Ok((rest, EvidenceMessage::Evidence(Box::new(evidence))))
            },
        )(buffer)
    }
}

impl Serializer<MempoolMessage> for MempoolMessageSerializer {
    fn serialize(
        &self,
        value: &MempoolMessage,
        buffer: &mut Vec<u8>,
    ) -> Result<(), SerializeError> {
        match value {
            MempoolMessage::Tx(tx) => {
                buffer.push(1);
                VecU8Serializer::new().serialize(&tx.0, buffer)
            }
        }
    }
}

impl Deserializer<MempoolMessage> for MempoolMessageDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], MempoolMessage, E> {
        context(
            "Failed mempool message deserialization",
            |input: &'a [u8]| {
                let (rest, tag) = nom::number::complete::be_u8(input)?;
                if tag != 1 {
                    return Err(fail(input));
                }
                let (rest, bytes) = VecU8Deserializer::new(2 * 1024 * 1024).deserialize(rest)?;
                Ok((rest, MempoolMessage::Tx(Tx(bytes))))
            },
        )(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corten_hash::Hash;
    use corten_serialization::DeserializeError;
    use corten_signature::{KeyPair, Signature, SIGNATURE_SIZE_BYTES};
    use corten_time::Timestamp;

    fn roundtrip<T, S, D>(serializer: &S, deserializer: &D, value: T)
    where
        T: PartialEq + std::fmt::Debug,
        S: Serializer<T>,
        D: Deserializer<T>,
    {
        let mut buffer = Vec::new();
        serializer.serialize(&value, &mut buffer).unwrap();
        let (rest, decoded) = deserializer
            .deserialize::<DeserializeError>(&buffer)
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, value);
    }

    fn sample_block_id() -> BlockId {
        BlockId {
            hash: Hash::compute_from(b"msg"),
            part_set_header: PartSetHeader {
                total: 4,
                hash: Hash::compute_from(b"parts"),
            },
        }
    }

    #[test]
    fn state_messages_roundtrip() {
        let serializer = StateMessageSerializer::new();
        let deserializer = StateMessageDeserializer::new();
        let mut parts = BitArray::new(4);
        parts.set_index(2, true);
        roundtrip(
            &serializer,
            &deserializer,
            StateMessage::NewRoundStep {
                height: 7,
                round: 2,
                step: RoundStep::Prevote,
                seconds_since_start_time: 11,
                last_commit_round: 1,
            },
        );
        roundtrip(
            &serializer,
            &deserializer,
            StateMessage::NewValidBlock {
                height: 7,
                round: 2,
                parts_header: sample_block_id().part_set_header,
                parts,
                is_commit: true,
            },
        );
        roundtrip(
            &serializer,
            &deserializer,
            StateMessage::HasVote {
                height: 7,
                round: 0,
                vote_type: SignedMsgType::Precommit,
                index: 3,
            },
        );
        roundtrip(
            &serializer,
            &deserializer,
            StateMessage::VoteSetMaj23 {
                height: 7,
                round: 0,
                vote_type: SignedMsgType::Prevote,
                block_id: sample_block_id(),
            },
        );
    }

    #[test]
    fn vote_and_data_messages_roundtrip() {
        let keypair = KeyPair::generate();
        let mut vote = Vote {
            vote_type: SignedMsgType::Prevote,
            height: 3,
            round: 1,
            block_id: sample_block_id(),
            timestamp: Timestamp::from_millis(5),
            validator_address: corten_models::address::Address::from_public_key(
                &keypair.get_public_key(),
            ),
            validator_index: 0,
            signature: Signature::from_bytes(&[0u8; SIGNATURE_SIZE_BYTES]),
        };
        vote.sign("codec-test", &keypair);
        roundtrip(
            &VoteChannelMessageSerializer::new(),
            &VoteChannelMessageDeserializer::new(),
            VoteChannelMessage::Vote(vote),
        );

        let data = vec![1u8; 300];
        let parts = corten_models::part_set::PartSet::from_data(&data, 256).unwrap();
        roundtrip(
            &DataMessageSerializer::new(),
            &DataMessageDeserializer::new(),
            DataMessage::BlockPart {
                height: 3,
                round: 1,
                part: parts.get_part(0).unwrap().clone(),
            },
        );
    }

    #[test]
    fn block_sync_messages_roundtrip() {
        let serializer = BlockSyncMessageSerializer::new();
        let deserializer = BlockSyncMessageDeserializer::new();
        roundtrip(&serializer, &deserializer, BlockSyncMessage::StatusRequest);
        roundtrip(
            &serializer,
            &deserializer,
            BlockSyncMessage::StatusResponse {
                base: 1,
                height: 42,
            },
        );
        roundtrip(
            &serializer,
            &deserializer,
            BlockSyncMessage::BlockRequest { height: 9 },
        );
        roundtrip(
            &serializer,
            &deserializer,
            BlockSyncMessage::NoBlockResponse { height: 9 },
        );
    }

    #[test]
    fn mempool_message_roundtrip() {
        roundtrip(
            &MempoolMessageSerializer::new(),
            &MempoolMessageDeserializer::new(),
            MempoolMessage::Tx(Tx(vec![1, 2, 3])),
        );
    }

    #[test]
    fn unknown_tag_rejected() {
        let buffer = vec![99u8, 0, 0];
        assert!(StateMessageDeserializer::new()
            .deserialize::<DeserializeError>(&buffer)
            .is_err());
    }
}
