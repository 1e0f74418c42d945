//! Evidence of byzantine behavior: double votes and light-client attacks.
//! Operations are total over the sum type; each variant knows how to hash,
//! age, validate, and project itself into the application interface.

use crate::abci;
use crate::block::{
    BlockHeader, BlockHeaderDeserializer, BlockHeaderSerializer, SignedHeader,
};
use crate::error::ModelsError;
use crate::validator::{
    Validator, ValidatorDeserializer, ValidatorSerializer, ValidatorSet,
    ValidatorSetDeserializer, ValidatorSetSerializer,
};
use crate::vote::{
    BlockIdFlag, CommitDeserializer, CommitSerializer, Vote, VoteDeserializer, VoteSerializer,
};
use crate::Height;
use corten_hash::{merkle, Hash};
use corten_serialization::{
    Deserializer, I64VarIntDeserializer, I64VarIntSerializer, SerializeError, Serializer,
    U64VarIntDeserializer, U64VarIntSerializer,
};
use corten_time::{Timestamp, TimestampDeserializer, TimestampSerializer};
use nom::{
    error::{context, ContextError, ParseError},
    multi::length_count,
    IResult,
};
use std::ops::Bound::Included;

/// Two conflicting votes by one validator at the same (height, round, type).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DuplicateVoteEvidence {
    /// The vote binding the lexicographically smaller block id.
    pub vote_a: Vote,
    /// The vote binding the lexicographically larger block id.
    pub vote_b: Vote,
    /// Total voting power of the set at the offending height.
    pub total_voting_power: i64,
    /// Power of the offending validator at that height.
    pub validator_power: i64,
    /// Time of the block the evidence is associated with.
    pub timestamp: Timestamp,
}

impl DuplicateVoteEvidence {
    /// Build evidence from two conflicting votes, ordering them canonically
    /// and recording the offender's power from `validator_set`.
    pub fn new(
        vote_1: Vote,
        vote_2: Vote,
        block_time: Timestamp,
        validator_set: &ValidatorSet,
    ) -> Result<Self, ModelsError> {
        let validator = validator_set
            .get_by_address(&vote_1.validator_address)
            .ok_or_else(|| {
                ModelsError::InvalidEvidence("validator is not in the validator set".into())
            })?;
        let (vote_a, vote_b) = if vote_1.block_id.key() < vote_2.block_id.key() {
            (vote_1, vote_2)
        } else {
            (vote_2, vote_1)
        };
        Ok(DuplicateVoteEvidence {
            total_voting_power: validator_set.total_voting_power(),
            validator_power: validator.voting_power,
            timestamp: block_time,
            vote_a,
            vote_b,
        })
    }

    /// Structural checks: both votes present, canonical order respected.
    pub fn validate_basic(&self) -> Result<(), ModelsError> {
        if self.vote_a.block_id.key() >= self.vote_b.block_id.key() {
            return Err(ModelsError::InvalidEvidence(
                "duplicate votes in invalid order".into(),
            ));
        }
        self.vote_a.validate_basic()?;
        self.vote_b.validate_basic()?;
        if self.vote_a.validator_address != self.vote_b.validator_address {
            return Err(ModelsError::InvalidEvidence(
                "duplicate votes from different validators".into(),
            ));
        }
        if (self.vote_a.height, self.vote_a.round, self.vote_a.vote_type)
            != (self.vote_b.height, self.vote_b.round, self.vote_b.vote_type)
        {
            return Err(ModelsError::InvalidEvidence(
                "duplicate votes from different height, round or type".into(),
            ));
        }
        Ok(())
    }
}

/// A conflicting header forged against a trusted one.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LightBlock {
    /// The conflicting header and the commit claiming to seal it.
    pub signed_header: SignedHeader,
    /// The validator set the commit claims.
    pub validator_set: ValidatorSet,
}

/// A light-client attack: a conflicting block diverging from the canonical
/// chain after a common ancestor height.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LightClientAttackEvidence {
    /// The forged block.
    pub conflicting_block: LightBlock,
    /// Height of the last header both chains share.
    pub common_height: Height,
    /// Validators that signed the forgery, derived at commit time.
    pub byzantine_validators: Vec<Validator>,
    /// Total voting power of the validator set at the common height.
    pub total_voting_power: i64,
    /// Time of the block the evidence is associated with.
    pub timestamp: Timestamp,
}

impl LightClientAttackEvidence {
    /// Structural checks.
    pub fn validate_basic(&self) -> Result<(), ModelsError> {
        if self.common_height <= 0 {
            return Err(ModelsError::InvalidEvidence(
                "negative or zero common height".into(),
            ));
        }
        if self.common_height > self.conflicting_block.signed_header.header.height {
            return Err(ModelsError::InvalidEvidence(
                "common height is ahead of the conflicting block height".into(),
            ));
        }
        if self.total_voting_power <= 0 {
            return Err(ModelsError::InvalidEvidence(
                "negative or zero total voting power".into(),
            ));
        }
        self.conflicting_block.signed_header.header.validate_basic()
    }

    /// A conflicting header whose claimed validator hash cannot be
    /// reproduced from its claimed validator set is a lunatic forgery.
    pub fn conflicting_header_is_invalid(&self, trusted_header: &BlockHeader) -> bool {
        let header = &self.conflicting_block.signed_header.header;
        header.validators_hash != trusted_header.validators_hash
    }

    /// Validators provably at fault: for a lunatic forgery, the common-set
    /// members that signed the conflicting commit; for same-height
    /// equivocation, the signers of both commits.
    pub fn get_byzantine_validators(
        &self,
        common_validators: &ValidatorSet,
        trusted: &SignedHeader,
    ) -> Vec<Validator> {
        let conflicting_commit = &self.conflicting_block.signed_header.commit;
        if self.conflicting_header_is_invalid(&trusted.header) {
            // lunatic attack: blame common-set validators that signed it
            let mut byzantine = Vec::new();
            for sig in conflicting_commit.signatures.iter() {
                if sig.flag != BlockIdFlag::Commit {
                    continue;
                }
                if let Some(val) = common_validators.get_by_address(&sig.validator_address) {
                    byzantine.push(val.clone());
                }
            }
            byzantine.sort_by(|a, b| a.address.cmp(&b.address));
            return byzantine;
        }
        if self.conflicting_block.signed_header.header.height == trusted.header.height {
            // equivocation: blame validators that signed both commits
            let mut byzantine = Vec::new();
            for sig in conflicting_commit.signatures.iter() {
                if sig.flag != BlockIdFlag::Commit {
                    continue;
                }
                let signed_trusted = trusted.commit.signatures.iter().any(|trusted_sig| {
                    trusted_sig.flag == BlockIdFlag::Commit
                        && trusted_sig.validator_address == sig.validator_address
                });
                if signed_trusted {
                    if let Some(val) = self
                        .conflicting_block
                        .validator_set
                        .get_by_address(&sig.validator_address)
                    {
                        byzantine.push(val.clone());
                    }
                }
            }
            byzantine.sort_by(|a, b| a.address.cmp(&b.address));
            return byzantine;
        }
        // amnesia: not attributable without a full light-client trace
        Vec::new()
    }
}

/// All evidence forms.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Evidence {
    /// Two conflicting votes.
    DuplicateVote(DuplicateVoteEvidence),
    /// A forged light-client block.
    LightClientAttack(LightClientAttackEvidence),
}

impl Evidence {
    /// Canonical bytes, the basis of the evidence hash and store layout.
    pub fn bytes(&self) -> Vec<u8> {
        EvidenceSerializer::new()
            .serialize_to_vec(self)
            .expect("evidence serialization cannot fail")
    }

    /// Evidence hash.
    pub fn hash(&self) -> Hash {
        Hash::compute_from(&self.bytes())
    }

    /// Height the offence happened at.
    pub fn height(&self) -> Height {
        match self {
            Evidence::DuplicateVote(ev) => ev.vote_a.height,
            Evidence::LightClientAttack(ev) => ev.common_height,
        }
    }

    /// Associated block time.
    pub fn timestamp(&self) -> Timestamp {
        match self {
            Evidence::DuplicateVote(ev) => ev.timestamp,
            Evidence::LightClientAttack(ev) => ev.timestamp,
        }
    }

    /// Structural checks.
    pub fn validate_basic(&self) -> Result<(), ModelsError> {
        match self {
            Evidence::DuplicateVote(ev) => ev.validate_basic(),
            Evidence::LightClientAttack(ev) => ev.validate_basic(),
        }
    }

    /// Project into the application-interface misbehavior records handed to
    /// begin-block.
    pub fn to_abci(&self) -> Vec<abci::Misbehavior> {
        match self {
            Evidence::DuplicateVote(ev) => vec![abci::Misbehavior {
                kind: abci::MisbehaviorKind::DuplicateVote,
                validator: abci::AbciValidator {
                    address: ev.vote_a.validator_address,
                    power: ev.validator_power,
                },
                height: ev.vote_a.height,
                time: ev.timestamp,
                total_voting_power: ev.total_voting_power,
            }],
            Evidence::LightClientAttack(ev) => ev
                .byzantine_validators
                .iter()
                .map(|val| abci::Misbehavior {
                    kind: abci::MisbehaviorKind::LightClientAttack,
                    validator: abci::AbciValidator {
                        address: val.address,
                        power: val.voting_power,
                    },
                    height: ev.common_height,
                    time: ev.timestamp,
                    total_voting_power: ev.total_voting_power,
                })
                .collect(),
        }
    }
}

impl std::fmt::Display for Evidence {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Evidence::DuplicateVote(ev) => write!(
                f,
                "DuplicateVoteEvidence(h={} validator={} power={}/{})",
                ev.vote_a.height,
                ev.vote_a.validator_address,
                ev.validator_power,
                ev.total_voting_power
            ),
            Evidence::LightClientAttack(ev) => write!(
                f,
                "LightClientAttackEvidence(common_height={} byzantine={})",
                ev.common_height,
                ev.byzantine_validators.len()
            ),
        }
    }
}

/// The evidence payload of one block.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EvidenceList {
    /// Included evidence, oldest first.
    pub evidence: Vec<Evidence>,
}

impl EvidenceList {
    /// Merkle root over the canonical evidence bytes.
    pub fn hash(&self) -> Hash {
        let leaves: Vec<Vec<u8>> = self.evidence.iter().map(|ev| ev.bytes()).collect();
        merkle::hash_from_bytes_list(&leaves)
    }

    /// True when `target` is present, by hash.
    pub fn has(&self, target: &Evidence) -> bool {
        let target_hash = target.hash();
        self.evidence.iter().any(|ev| ev.hash() == target_hash)
    }

    /// Total canonical byte size.
    pub fn byte_size(&self) -> usize {
        self.evidence.iter().map(|ev| ev.bytes().len()).sum()
    }
}

const TAG_DUPLICATE_VOTE: u8 = 1;
const TAG_LIGHT_CLIENT_ATTACK: u8 = 2;

/// Serializer for [`Evidence`].
#[derive(Clone, Default)]
pub struct EvidenceSerializer {
    vote_serializer: VoteSerializer,
    i64_serializer: I64VarIntSerializer,
    u64_serializer: U64VarIntSerializer,
    timestamp_serializer: TimestampSerializer,
    header_serializer: BlockHeaderSerializer,
    commit_serializer: CommitSerializer,
    validator_serializer: ValidatorSerializer,
    validator_set_serializer: ValidatorSetSerializer,
}

impl EvidenceSerializer {
    /// Create an evidence serializer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Serializer<Evidence> for EvidenceSerializer {
    fn serialize(&self, value: &Evidence, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        match value {
            Evidence::DuplicateVote(ev) => {
                buffer.push(TAG_DUPLICATE_VOTE);
                self.vote_serializer.serialize(&ev.vote_a, buffer)?;
                self.vote_serializer.serialize(&ev.vote_b, buffer)?;
                self.i64_serializer
                    .serialize(&ev.total_voting_power, buffer)?;
                self.i64_serializer.serialize(&ev.validator_power, buffer)?;
                self.timestamp_serializer.serialize(&ev.timestamp, buffer)
            }
            Evidence::LightClientAttack(ev) => {
                buffer.push(TAG_LIGHT_CLIENT_ATTACK);
                self.header_serializer
                    .serialize(&ev.conflicting_block.signed_header.header, buffer)?;
                self.commit_serializer
                    .serialize(&ev.conflicting_block.signed_header.commit, buffer)?;
                self.validator_set_serializer
                    .serialize(&ev.conflicting_block.validator_set, buffer)?;
                self.i64_serializer.serialize(&ev.common_height, buffer)?;
                self.u64_serializer
                    .serialize(&(ev.byzantine_validators.len() as u64), buffer)?;
                for val in &ev.byzantine_validators {
                    self.validator_serializer.serialize(val, buffer)?;
                }
                self.i64_serializer
                    .serialize(&ev.total_voting_power, buffer)?;
                self.timestamp_serializer.serialize(&ev.timestamp, buffer)
            }
        }
    }
}

/// Deserializer for [`Evidence`].
#[derive(Clone)]
pub struct EvidenceDeserializer {
    vote_deserializer: VoteDeserializer,
    i64_deserializer: I64VarIntDeserializer,
    count_deserializer: U64VarIntDeserializer,
    timestamp_deserializer: TimestampDeserializer,
    header_deserializer: BlockHeaderDeserializer,
    commit_deserializer: CommitDeserializer,
    validator_deserializer: ValidatorDeserializer,
    validator_set_deserializer: ValidatorSetDeserializer,
}

impl EvidenceDeserializer {
    /// Create an evidence deserializer.
    pub fn new() -> Self {
        Self {
            vote_deserializer: VoteDeserializer::new(),
            i64_deserializer: I64VarIntDeserializer::new(),
            count_deserializer: U64VarIntDeserializer::new(Included(0), Included(u16::MAX as u64)),
            timestamp_deserializer: TimestampDeserializer::new(),
            header_deserializer: BlockHeaderDeserializer::new(),
            commit_deserializer: CommitDeserializer::new(u16::MAX as u64),
            validator_deserializer: ValidatorDeserializer::new(),
            validator_set_deserializer: ValidatorSetDeserializer::new(u16::MAX as u64),
        }
    }
}

impl Default for EvidenceDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<Evidence> for EvidenceDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Evidence, E> {
        context("Failed evidence deserialization", |input: &'a [u8]| {
            let (rest, tag) = nom::number::complete::be_u8(input)?;
            match tag {
                TAG_DUPLICATE_VOTE => {
                    let (rest, vote_a) = self.vote_deserializer.deserialize(rest)?;
                    let (rest, vote_b) = self.vote_deserializer.deserialize(rest)?;
                    let (rest, total_voting_power) = self.i64_deserializer.deserialize(rest)?;
                    let (rest, validator_power) = self.i64_deserializer.deserialize(rest)?;
                    let (rest, timestamp) = self.timestamp_deserializer.deserialize(rest)?;
                    Ok((
                        rest,
                        Evidence::DuplicateVote(DuplicateVoteEvidence {
                            vote_a,
                            vote_b,
                            total_voting_power,
                            validator_power,
                            timestamp,
                        }),
                    ))
                }
                TAG_LIGHT_CLIENT_ATTACK => {
                    let (rest, header) = self.header_deserializer.deserialize(rest)?;
                    let (rest, commit) = self.commit_deserializer.deserialize(rest)?;
                    let (rest, validator_set) =
                        self.validator_set_deserializer.deserialize(rest)?;
                    let (rest, common_height) = self.i64_deserializer.deserialize(rest)?;
                    let (mut rest, count) = self.count_deserializer.deserialize(rest)?;
                    let mut byzantine_validators = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        let (new_rest, val) = self.validator_deserializer.deserialize(rest)?;
                        byzantine_validators.push(val);
                        rest = new_rest;
                    }
                    let (rest, total_voting_power) = self.i64_deserializer.deserialize(rest)?;
                    let (rest, timestamp) = self.timestamp_deserializer.deserialize(rest)?;
                    Ok((
                        rest,
                        Evidence::LightClientAttack(LightClientAttackEvidence {
                            conflicting_block: LightBlock {
                                signed_header: SignedHeader { header, commit },
                                validator_set,
                            },
                            common_height,
                            byzantine_validators,
                            total_voting_power,
                            timestamp,
                        }),
                    ))
                }
                _ => Err(nom::Err::Error(ParseError::from_error_kind(
                    input,
                    nom::error::ErrorKind::Tag,
                ))),
            }
        })(buffer)
    }
}

/// Serializer for [`EvidenceList`].
#[derive(Clone, Default)]
pub struct EvidenceListSerializer {
    u64_serializer: U64VarIntSerializer,
    evidence_serializer: EvidenceSerializer,
}

impl EvidenceListSerializer {
    /// Create an evidence list serializer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Serializer<EvidenceList> for EvidenceListSerializer {
    fn serialize(&self, value: &EvidenceList, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.u64_serializer
            .serialize(&(value.evidence.len() as u64), buffer)?;
        for evidence in &value.evidence {
            self.evidence_serializer.serialize(evidence, buffer)?;
        }
        Ok(())
    }
}

/// Deserializer for [`EvidenceList`].
#[derive(Clone)]
pub struct EvidenceListDeserializer {
    count_deserializer: U64VarIntDeserializer,
    evidence_deserializer: EvidenceDeserializer,
}

impl EvidenceListDeserializer {
    /// Create an evidence list deserializer.
    pub fn new() -> Self {
        Self {
            count_deserializer: U64VarIntDeserializer::new(Included(0), Included(u16::MAX as u64)),
            evidence_deserializer: EvidenceDeserializer::new(),
        }
    }
}

impl Default for EvidenceListDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<EvidenceList> for EvidenceListDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], EvidenceList, E> {
        context(
            "Failed evidence list deserialization",
            length_count(
                context("Failed evidence count deserialization", |input| {
                    self.count_deserializer.deserialize(input)
                }),
                context("Failed evidence deserialization", |input| {
                    self.evidence_deserializer.deserialize(input)
                }),
            ),
        )(buffer)
        .map(|(rest, evidence)| (rest, EvidenceList { evidence }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::block_id::{BlockId, PartSetHeader};
    use crate::vote::SignedMsgType;
    use corten_signature::{KeyPair, Signature, SIGNATURE_SIZE_BYTES};
    use nom::error::VerboseError;

    const CHAIN_ID: &str = "test-chain";

    fn block_id(tag: &[u8]) -> BlockId {
        BlockId {
            hash: Hash::compute_from(tag),
            part_set_header: PartSetHeader {
                total: 1,
                hash: Hash::compute_from(tag),
            },
        }
    }

    fn signed_vote(keypair: &KeyPair, id: BlockId) -> Vote {
        let mut vote = Vote {
            vote_type: SignedMsgType::Precommit,
            height: 5,
            round: 1,
            block_id: id,
            timestamp: Timestamp::from_millis(77),
            validator_address: Address::from_public_key(&keypair.get_public_key()),
            validator_index: 0,
            signature: Signature::from_bytes(&[0u8; SIGNATURE_SIZE_BYTES]),
        };
        vote.sign(CHAIN_ID, keypair);
        vote
    }

    fn duplicate_vote_fixture() -> (KeyPair, DuplicateVoteEvidence) {
        let keypair = KeyPair::generate();
        let validators =
            ValidatorSet::new(vec![Validator::new(keypair.get_public_key(), 10)]).unwrap();
        let vote_1 = signed_vote(&keypair, block_id(b"a"));
        let vote_2 = signed_vote(&keypair, block_id(b"b"));
        let evidence = DuplicateVoteEvidence::new(
            vote_1,
            vote_2,
            Timestamp::from_millis(1_234),
            &validators,
        )
        .unwrap();
        (keypair, evidence)
    }

    #[test]
    fn canonical_order_is_enforced() {
        let (_, evidence) = duplicate_vote_fixture();
        assert!(evidence.vote_a.block_id.key() < evidence.vote_b.block_id.key());
        evidence.validate_basic().unwrap();

        // swapped pair fails validation
        let swapped = DuplicateVoteEvidence {
            vote_a: evidence.vote_b.clone(),
            vote_b: evidence.vote_a.clone(),
            ..evidence
        };
        assert!(swapped.validate_basic().is_err());
    }

    #[test]
    fn abci_fields_recorded() {
        let (_, evidence) = duplicate_vote_fixture();
        assert_eq!(evidence.validator_power, 10);
        assert_eq!(evidence.total_voting_power, 10);
        assert_eq!(evidence.timestamp, Timestamp::from_millis(1_234));
        let abci = Evidence::DuplicateVote(evidence).to_abci();
        assert_eq!(abci.len(), 1);
        assert_eq!(abci[0].height, 5);
        assert_eq!(abci[0].validator.power, 10);
    }

    #[test]
    fn hash_stable_under_reserialization() {
        let (_, evidence) = duplicate_vote_fixture();
        let evidence = Evidence::DuplicateVote(evidence);
        let hash_1 = evidence.hash();
        let mut buffer = Vec::new();
        EvidenceSerializer::new()
            .serialize(&evidence, &mut buffer)
            .unwrap();
        let (rest, decoded) = EvidenceDeserializer::new()
            .deserialize::<VerboseError<&[u8]>>(&buffer)
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, evidence);
        assert_eq!(decoded.hash(), hash_1);
    }

    #[test]
    fn evidence_list_hash_and_lookup() {
        let (_, evidence) = duplicate_vote_fixture();
        let evidence = Evidence::DuplicateVote(evidence);
        let list = EvidenceList {
            evidence: vec![evidence.clone()],
        };
        assert!(list.has(&evidence));
        assert_ne!(list.hash(), EvidenceList::default().hash());
        assert!(list.byte_size() > 0);
    }
}
