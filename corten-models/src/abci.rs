//! Application-interface request/response types, wire-compatible in meaning
//! with ABCI 0.35. The engine drives the application through these; transport
//! encoding belongs to the (out-of-scope) application adapter.

use crate::address::Address;
use crate::block::BlockHeader;
use crate::consensus_params::ConsensusParamsUpdate;
use crate::validator::Validator;
use crate::{Height, Round};
use corten_hash::{merkle, Hash};
use corten_serialization::{SerializeError, Serializer, U64VarIntSerializer, VecU8Serializer};
use corten_signature::PublicKey;
use corten_time::Timestamp;

/// Response code signalling success.
pub const CODE_TYPE_OK: u32 = 0;

/// A key/value attribute of an emitted event.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EventAttribute {
    /// Attribute key.
    pub key: String,
    /// Attribute value.
    pub value: String,
    /// Whether the attribute should be indexed.
    pub index: bool,
}

/// An event emitted by the application.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Event {
    /// Event type label.
    pub kind: String,
    /// Attributes.
    pub attributes: Vec<EventAttribute>,
}

/// Validator identity as the application sees it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AbciValidator {
    /// Address of the validator.
    pub address: Address,
    /// Voting power.
    pub power: i64,
}

/// Kinds of provable misbehavior reported to the application.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MisbehaviorKind {
    /// Double signing at one (height, round, type).
    DuplicateVote,
    /// Light-client attack.
    LightClientAttack,
}

/// One misbehavior record handed to begin-block.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Misbehavior {
    /// Kind of offence.
    pub kind: MisbehaviorKind,
    /// The offending validator.
    pub validator: AbciValidator,
    /// Height of the offence.
    pub height: Height,
    /// Time of the block associated with the offence.
    pub time: Timestamp,
    /// Total voting power at the offending height.
    pub total_voting_power: i64,
}

/// A validator change requested by the application. Power `0` removes.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ValidatorUpdate {
    /// Public key of the validator.
    pub pub_key: PublicKey,
    /// New voting power.
    pub power: i64,
}

impl ValidatorUpdate {
    /// Convert into a model validator with zero priority.
    pub fn to_validator(&self) -> Validator {
        Validator::new(self.pub_key, self.power)
    }
}

/// `info` request.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RequestInfo {
    /// Engine version string.
    pub version: String,
    /// Block protocol version.
    pub block_version: u64,
    /// Peer protocol version.
    pub p2p_version: u64,
    /// Application-interface version string.
    pub abci_version: String,
}

/// `info` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResponseInfo {
    /// Arbitrary application data.
    pub data: String,
    /// Application version string.
    pub version: String,
    /// Application version number.
    pub app_version: u64,
    /// Last height the application committed.
    pub last_block_height: Height,
    /// Application hash after that height.
    pub last_block_app_hash: Vec<u8>,
}

/// `init_chain` request.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RequestInitChain {
    /// Genesis time.
    pub time: Timestamp,
    /// Chain identifier.
    pub chain_id: String,
    /// First block height.
    pub initial_height: Height,
    /// Genesis consensus parameters.
    pub consensus_params: crate::consensus_params::ConsensusParams,
    /// Genesis validators.
    pub validators: Vec<ValidatorUpdate>,
    /// Raw application genesis state.
    pub app_state_bytes: Vec<u8>,
}

/// `init_chain` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResponseInitChain {
    /// Overridden consensus parameters, if any.
    pub consensus_params: Option<ConsensusParamsUpdate>,
    /// Overridden validator set, if non-empty.
    pub validators: Vec<ValidatorUpdate>,
    /// Initial application hash.
    pub app_hash: Vec<u8>,
}

/// Commit information handed to begin-block.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LastCommitInfo {
    /// Round the last commit was formed in.
    pub round: Round,
    /// Per-validator participation.
    pub votes: Vec<VoteInfo>,
}

/// One validator's participation in the last commit.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct VoteInfo {
    /// The validator.
    pub validator: AbciValidator,
    /// Whether it signed the last block.
    pub signed_last_block: bool,
}

/// `begin_block` request.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RequestBeginBlock {
    /// Hash of the block being executed.
    pub hash: Hash,
    /// Header of the block being executed.
    pub header: BlockHeader,
    /// Participation in the commit of the previous height.
    pub last_commit_info: LastCommitInfo,
    /// Evidence committed in this block.
    pub byzantine_validators: Vec<Misbehavior>,
}

/// `begin_block` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResponseBeginBlock {
    /// Events emitted at block start.
    pub events: Vec<Event>,
}

/// `deliver_tx` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResponseDeliverTx {
    /// Result code; [`CODE_TYPE_OK`] on success.
    pub code: u32,
    /// Result payload.
    pub data: Vec<u8>,
    /// Human-readable log.
    pub log: String,
    /// Additional information.
    pub info: String,
    /// Gas the transaction asked for.
    pub gas_wanted: i64,
    /// Gas the transaction used.
    pub gas_used: i64,
    /// Events emitted by the transaction.
    pub events: Vec<Event>,
    /// Namespace of the result code.
    pub codespace: String,
}

impl ResponseDeliverTx {
    /// True on success.
    pub fn is_ok(&self) -> bool {
        self.code == CODE_TYPE_OK
    }

    /// Deterministic bytes committed into `last_results_hash`.
    pub fn result_bytes(&self) -> Vec<u8> {
        let u64_serializer = U64VarIntSerializer::new();
        let bytes_serializer = VecU8Serializer::new();
        let mut buffer = Vec::new();
        let _ = write_u64(&u64_serializer, self.code as u64, &mut buffer);
        let _ = bytes_serializer.serialize(&self.data, &mut buffer);
        let _ = write_u64(&u64_serializer, self.gas_wanted as u64, &mut buffer);
        let _ = write_u64(&u64_serializer, self.gas_used as u64, &mut buffer);
        buffer
    }
}

fn write_u64(
    serializer: &U64VarIntSerializer,
    value: u64,
    buffer: &mut Vec<u8>,
) -> Result<(), SerializeError> {
    serializer.serialize(&value, buffer)
}

/// Merkle root over the deterministic deliver-tx results of one block.
pub fn results_hash(responses: &[ResponseDeliverTx]) -> Hash {
    let leaves: Vec<Vec<u8>> = responses
        .iter()
        .map(|response| response.result_bytes())
        .collect();
    merkle::hash_from_bytes_list(&leaves)
}

/// `end_block` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResponseEndBlock {
    /// Validator change set, applied at height + 2.
    pub validator_updates: Vec<ValidatorUpdate>,
    /// Consensus parameter delta, applied at height + 1.
    pub consensus_param_updates: Option<ConsensusParamsUpdate>,
    /// Events emitted at block end.
    pub events: Vec<Event>,
}

/// `commit` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResponseCommit {
    /// New application hash.
    pub data: Vec<u8>,
    /// Heights below this may be pruned; `0` disables pruning.
    pub retain_height: Height,
}

/// Why a transaction is being checked.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CheckTxKind {
    /// First submission.
    New,
    /// Re-validation after a block was committed.
    Recheck,
}

/// `check_tx` response.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResponseCheckTx {
    /// Result code; [`CODE_TYPE_OK`] admits the transaction.
    pub code: u32,
    /// Result payload.
    pub data: Vec<u8>,
    /// Human-readable log.
    pub log: String,
    /// Additional information.
    pub info: String,
    /// Gas the transaction asks for.
    pub gas_wanted: i64,
    /// Gas used during the check.
    pub gas_used: i64,
    /// Events emitted during the check.
    pub events: Vec<Event>,
    /// Namespace of the result code.
    pub codespace: String,
    /// Account the transaction spends from, for nonce ordering.
    pub sender: String,
    /// Account nonce of the transaction.
    pub nonce: u64,
    /// Application-assigned mempool priority.
    pub priority: i64,
    /// Reason the mempool should reject despite an OK code.
    pub mempool_error: String,
}

impl Default for ResponseCheckTx {
    fn default() -> Self {
        ResponseCheckTx {
            code: CODE_TYPE_OK,
            data: Vec::new(),
            log: String::new(),
            info: String::new(),
            gas_wanted: 1,
            gas_used: 0,
            events: Vec::new(),
            codespace: String::new(),
            sender: String::new(),
            nonce: 0,
            priority: 0,
            mempool_error: String::new(),
        }
    }
}

/// The responses of one executed block, persisted per height.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AbciResponses {
    /// begin-block response.
    pub begin_block: ResponseBeginBlock,
    /// deliver-tx responses in block order.
    pub deliver_txs: Vec<ResponseDeliverTx>,
    /// end-block response.
    pub end_block: ResponseEndBlock,
}
