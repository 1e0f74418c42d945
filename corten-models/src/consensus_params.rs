//! Consensus parameters: block limits, evidence ages, accepted validator key
//! types. Updated by the application through end-block responses.

use crate::error::ModelsError;
use corten_hash::Hash;
use corten_serialization::{SerializeError, Serializer, U64VarIntSerializer};
use corten_time::Timestamp;

/// Hard cap on a block's total byte size.
pub const MAX_BLOCK_SIZE_BYTES: i64 = 21 * 1024 * 1024;
/// Key type label for Ed25519.
pub const KEY_TYPE_ED25519: &str = "ed25519";

/// Limits on block size and total gas.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BlockParams {
    /// Soft ceiling on block bytes; must stay within [`MAX_BLOCK_SIZE_BYTES`].
    pub max_bytes: i64,
    /// Gas ceiling per block, `-1` for unlimited.
    pub max_gas: i64,
}

/// Evidence acceptance windows.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EvidenceParams {
    /// Maximum height distance for evidence to stay valid.
    pub max_age_num_blocks: i64,
    /// Maximum time distance for evidence to stay valid.
    pub max_age_duration: Timestamp,
    /// Maximum total evidence bytes per block.
    pub max_bytes: i64,
}

/// Accepted validator key types.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ValidatorParams {
    /// Key type labels; only [`KEY_TYPE_ED25519`] is understood.
    pub pub_key_types: Vec<String>,
}

/// The full parameter set.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConsensusParams {
    /// Block limits.
    pub block: BlockParams,
    /// Evidence windows.
    pub evidence: EvidenceParams,
    /// Validator key policy.
    pub validator: ValidatorParams,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        ConsensusParams {
            block: BlockParams {
                max_bytes: MAX_BLOCK_SIZE_BYTES,
                max_gas: -1,
            },
            evidence: EvidenceParams {
                max_age_num_blocks: 100_000,
                max_age_duration: Timestamp::from_millis(48 * 3600 * 1000),
                max_bytes: 1024 * 1024,
            },
            validator: ValidatorParams {
                pub_key_types: vec![KEY_TYPE_ED25519.to_string()],
            },
        }
    }
}

/// Partial parameter update returned by the application.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConsensusParamsUpdate {
    /// New block limits, if any.
    pub block: Option<BlockParams>,
    /// New evidence windows, if any.
    pub evidence: Option<EvidenceParams>,
    /// New validator key policy, if any.
    pub validator: Option<ValidatorParams>,
}

impl ConsensusParams {
    /// Apply an update without mutating `self`.
    pub fn update(&self, update: &ConsensusParamsUpdate) -> ConsensusParams {
        ConsensusParams {
            block: update.block.clone().unwrap_or_else(|| self.block.clone()),
            evidence: update
                .evidence
                .clone()
                .unwrap_or_else(|| self.evidence.clone()),
            validator: update
                .validator
                .clone()
                .unwrap_or_else(|| self.validator.clone()),
        }
    }

    /// Sanity-check the parameter set.
    pub fn validate(&self) -> Result<(), ModelsError> {
        if self.block.max_bytes <= 0 || self.block.max_bytes > MAX_BLOCK_SIZE_BYTES {
            return Err(ModelsError::InvalidConsensusParams(format!(
                "block.max_bytes {} out of range",
                self.block.max_bytes
            )));
        }
        if self.block.max_gas < -1 {
            return Err(ModelsError::InvalidConsensusParams(format!(
                "block.max_gas {} below -1",
                self.block.max_gas
            )));
        }
        if self.evidence.max_age_num_blocks <= 0 {
            return Err(ModelsError::InvalidConsensusParams(
                "evidence.max_age_num_blocks must be positive".into(),
            ));
        }
        if self.evidence.max_bytes < 0 {
            return Err(ModelsError::InvalidConsensusParams(
                "evidence.max_bytes must be non-negative".into(),
            ));
        }
        if self.validator.pub_key_types.is_empty() {
            return Err(ModelsError::InvalidConsensusParams(
                "validator.pub_key_types is empty".into(),
            ));
        }
        for key_type in &self.validator.pub_key_types {
            if key_type != KEY_TYPE_ED25519 {
                return Err(ModelsError::InvalidConsensusParams(format!(
                    "unknown validator key type {}",
                    key_type
                )));
            }
        }
        Ok(())
    }

    /// Digest committed into each header's `consensus_hash` field.
    pub fn hash(&self) -> Hash {
        let serializer = U64VarIntSerializer::new();
        let mut buffer = Vec::new();
        let fields = [
            self.block.max_bytes as u64,
            self.block.max_gas as u64,
            self.evidence.max_age_num_blocks as u64,
            self.evidence.max_age_duration.as_millis(),
            self.evidence.max_bytes as u64,
        ];
        for field in fields {
            // infallible: varint encoding of u64 cannot error
            let _ = write_field(&serializer, field, &mut buffer);
        }
        for key_type in &self.validator.pub_key_types {
            buffer.extend_from_slice(key_type.as_bytes());
        }
        Hash::compute_from(&buffer)
    }
}

fn write_field(
    serializer: &U64VarIntSerializer,
    value: u64,
    buffer: &mut Vec<u8>,
) -> Result<(), SerializeError> {
    serializer.serialize(&value, buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        ConsensusParams::default().validate().unwrap();
    }

    #[test]
    fn update_is_partial() {
        let params = ConsensusParams::default();
        let updated = params.update(&ConsensusParamsUpdate {
            block: Some(BlockParams {
                max_bytes: 1024,
                max_gas: 50,
            }),
            ..Default::default()
        });
        assert_eq!(updated.block.max_bytes, 1024);
        assert_eq!(updated.evidence, params.evidence);
        assert_ne!(updated.hash(), params.hash());
    }

    #[test]
    fn invalid_params_rejected() {
        let mut params = ConsensusParams::default();
        params.block.max_bytes = 0;
        assert!(params.validate().is_err());

        let mut params = ConsensusParams::default();
        params.validator.pub_key_types = vec!["secp256k1".to_string()];
        assert!(params.validate().is_err());
    }
}
