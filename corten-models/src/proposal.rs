//! Block proposals, signed by the round's proposer.

use crate::address::Address;
use crate::block_id::{BlockId, BlockIdDeserializer, BlockIdSerializer};
use crate::error::ModelsError;
use crate::{Height, Round};
use corten_serialization::{
    proto, Deserializer, I64VarIntDeserializer, I64VarIntSerializer, SerializeError, Serializer,
};
use corten_signature::{KeyPair, PublicKey, Signature, SignatureDeserializer};
use corten_time::{Timestamp, TimestampDeserializer, TimestampSerializer};
use nom::{
    error::{context, ContextError, ParseError},
    IResult,
};

use crate::vote::SignedMsgType;

/// A proposal binds (height, round) to a block id, carrying the proof-of-lock
/// round the proposer re-proposes from (`-1` when fresh).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Proposal {
    /// Proposed height.
    pub height: Height,
    /// Proposal round.
    pub round: Round,
    /// Proof-of-lock round, `-1` when the block is fresh.
    pub pol_round: Round,
    /// Proposed block.
    pub block_id: BlockId,
    /// Proposer signing time.
    pub timestamp: Timestamp,
    /// Proposer signature over the canonical payload.
    pub signature: Signature,
}

impl Proposal {
    /// Canonical signing payload, mirroring the canonical-proposal protobuf.
    pub fn sign_bytes(&self, chain_id: &str) -> Vec<u8> {
        let mut body = Vec::new();
        proto::write_varint_field(1, u8::from(SignedMsgType::Proposal) as u64, &mut body);
        proto::write_sfixed64_field(2, self.height, &mut body);
        proto::write_sfixed64_field(3, self.round as i64, &mut body);
        proto::write_sfixed64_field(4, self.pol_round as i64, &mut body);
        if !self.block_id.is_zero() {
            proto::write_message_field(5, &self.block_id.canonical_bytes(), &mut body);
        }
        let (seconds, nanos) = self.timestamp.seconds_nanos();
        proto::write_timestamp_field(6, seconds, nanos, &mut body);
        proto::write_bytes_field(7, chain_id.as_bytes(), &mut body);

        let mut payload = Vec::with_capacity(body.len() + 2);
        proto::write_uvarint(body.len() as u64, &mut payload);
        payload.extend_from_slice(&body);
        payload
    }

    /// Sign the canonical payload.
    pub fn sign(&mut self, chain_id: &str, keypair: &KeyPair) {
        self.signature = keypair.sign(&self.sign_bytes(chain_id));
    }

    /// Verify the proposer's signature.
    pub fn verify(
        &self,
        chain_id: &str,
        proposer_key: &PublicKey,
        proposer_address: &Address,
    ) -> Result<(), ModelsError> {
        if Address::from_public_key(proposer_key) != *proposer_address {
            return Err(ModelsError::InvalidVote(
                "proposal signer address mismatch".into(),
            ));
        }
        proposer_key
            .verify(&self.sign_bytes(chain_id), &self.signature)
            .map_err(|err| ModelsError::InvalidVote(format!("bad proposal signature: {}", err)))
    }

    /// Structural checks.
    pub fn validate_basic(&self) -> Result<(), ModelsError> {
        if self.height < 0 || self.round < 0 {
            return Err(ModelsError::InvalidVote(
                "negative proposal height or round".into(),
            ));
        }
        if self.pol_round < -1 || self.pol_round >= self.round {
            return Err(ModelsError::InvalidVote(format!(
                "invalid pol_round {} for round {}",
                self.pol_round, self.round
            )));
        }
        if !self.block_id.is_complete() {
            return Err(ModelsError::InvalidVote(
                "proposal block id must be complete".into(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Display for Proposal {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Proposal({}/{} pol={} {})",
            self.height, self.round, self.pol_round, self.block_id
        )
    }
}

/// Serializer for [`Proposal`].
#[derive(Clone, Default)]
pub struct ProposalSerializer {
    i64_serializer: I64VarIntSerializer,
    block_id_serializer: BlockIdSerializer,
    timestamp_serializer: TimestampSerializer,
}

impl ProposalSerializer {
    /// Create a proposal serializer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Serializer<Proposal> for ProposalSerializer {
    fn serialize(&self, value: &Proposal, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.i64_serializer.serialize(&value.height, buffer)?;
        self.i64_serializer.serialize(&(value.round as i64), buffer)?;
        self.i64_serializer
            .serialize(&(value.pol_round as i64), buffer)?;
        self.block_id_serializer.serialize(&value.block_id, buffer)?;
        self.timestamp_serializer
            .serialize(&value.timestamp, buffer)?;
        buffer.extend_from_slice(&value.signature.to_bytes());
        Ok(())
    }
}

/// Deserializer for [`Proposal`].
#[derive(Clone, Default)]
pub struct ProposalDeserializer {
    i64_deserializer: I64VarIntDeserializer,
    block_id_deserializer: BlockIdDeserializer,
    timestamp_deserializer: TimestampDeserializer,
    signature_deserializer: SignatureDeserializer,
}

impl ProposalDeserializer {
    /// Create a proposal deserializer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Deserializer<Proposal> for ProposalDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Proposal, E> {
        context("Failed proposal deserialization", |input: &'a [u8]| {
            let (rest, height) = self.i64_deserializer.deserialize(input)?;
            let (rest, round) = self.i64_deserializer.deserialize(rest)?;
            let (rest, pol_round) = self.i64_deserializer.deserialize(rest)?;
            let (rest, block_id) = self.block_id_deserializer.deserialize(rest)?;
            let (rest, timestamp) = self.timestamp_deserializer.deserialize(rest)?;
            let (rest, signature) = self.signature_deserializer.deserialize(rest)?;
            Ok((
                rest,
                Proposal {
                    height,
                    round: round as Round,
                    pol_round: pol_round as Round,
                    block_id,
                    timestamp,
                    signature,
                },
            ))
        })(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_id::PartSetHeader;
    use corten_hash::Hash;
    use corten_signature::SIGNATURE_SIZE_BYTES;
    use nom::error::VerboseError;

    fn sample_proposal(keypair: &KeyPair) -> Proposal {
        let mut proposal = Proposal {
            height: 3,
            round: 2,
            pol_round: -1,
            block_id: BlockId {
                hash: Hash::compute_from(b"proposal"),
                part_set_header: PartSetHeader {
                    total: 2,
                    hash: Hash::compute_from(b"parts"),
                },
            },
            timestamp: Timestamp::from_millis(42),
            signature: Signature::from_bytes(&[0u8; SIGNATURE_SIZE_BYTES]),
        };
        proposal.sign("test-chain", keypair);
        proposal
    }

    #[test]
    fn sign_verify() {
        let keypair = KeyPair::generate();
        let proposal = sample_proposal(&keypair);
        let address = Address::from_public_key(&keypair.get_public_key());
        proposal
            .verify("test-chain", &keypair.get_public_key(), &address)
            .unwrap();
        assert!(proposal
            .verify("wrong", &keypair.get_public_key(), &address)
            .is_err());
    }

    #[test]
    fn pol_round_bounds() {
        let keypair = KeyPair::generate();
        let mut proposal = sample_proposal(&keypair);
        proposal.validate_basic().unwrap();
        proposal.pol_round = 2;
        assert!(proposal.validate_basic().is_err());
    }

    #[test]
    fn wire_roundtrip() {
        let keypair = KeyPair::generate();
        let proposal = sample_proposal(&keypair);
        let mut buffer = Vec::new();
        ProposalSerializer::new()
            .serialize(&proposal, &mut buffer)
            .unwrap();
        let (rest, decoded) = ProposalDeserializer::new()
            .deserialize::<VerboseError<&[u8]>>(&buffer)
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, proposal);
    }
}
