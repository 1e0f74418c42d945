//! The genesis document, read from JSON at chain initialization.

use crate::address::Address;
use crate::block::MAX_CHAIN_ID_LENGTH;
use crate::consensus_params::ConsensusParams;
use crate::error::ModelsError;
use crate::Height;
use corten_signature::PublicKey;
use corten_time::Timestamp;

/// One genesis validator entry.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GenesisValidator {
    /// Address; derived from the public key when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    /// Ed25519 public key.
    pub pub_key: PublicKey,
    /// Voting power.
    pub power: i64,
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// The genesis document.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GenesisDoc {
    /// Chain start time.
    pub genesis_time: Timestamp,
    /// Chain identifier, at most [`MAX_CHAIN_ID_LENGTH`] characters.
    pub chain_id: String,
    /// First block height; defaults to 1.
    #[serde(default = "default_initial_height")]
    pub initial_height: Height,
    /// Consensus parameters; engine defaults when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus_params: Option<ConsensusParams>,
    /// Genesis validators.
    #[serde(default)]
    pub validators: Vec<GenesisValidator>,
    /// Raw application genesis state.
    #[serde(default)]
    pub app_state: serde_json::Value,
    /// Expected initial application hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_hash: Option<Vec<u8>>,
}

fn default_initial_height() -> Height {
    1
}

impl GenesisDoc {
    /// Parse from JSON and normalize.
    pub fn from_json(data: &[u8]) -> Result<Self, ModelsError> {
        let mut genesis: GenesisDoc = serde_json::from_slice(data)
            .map_err(|err| ModelsError::InvalidGenesis(err.to_string()))?;
        genesis.validate_and_complete()?;
        Ok(genesis)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, ModelsError> {
        serde_json::to_string_pretty(self)
            .map_err(|err| ModelsError::InvalidGenesis(err.to_string()))
    }

    /// Check invariants and fill derivable fields (validator addresses,
    /// default initial height).
    pub fn validate_and_complete(&mut self) -> Result<(), ModelsError> {
        if self.chain_id.is_empty() {
            return Err(ModelsError::InvalidGenesis("empty chain id".into()));
        }
        if self.chain_id.len() > MAX_CHAIN_ID_LENGTH {
            return Err(ModelsError::InvalidGenesis(format!(
                "chain id longer than {} characters",
                MAX_CHAIN_ID_LENGTH
            )));
        }
        if self.initial_height == 0 {
            self.initial_height = 1;
        }
        if self.initial_height < 0 {
            return Err(ModelsError::InvalidGenesis(format!(
                "initial height {} is negative",
                self.initial_height
            )));
        }
        if let Some(params) = &self.consensus_params {
            params.validate()?;
        }
        for genesis_val in self.validators.iter_mut() {
            if genesis_val.power < 0 {
                return Err(ModelsError::InvalidGenesis(format!(
                    "validator {} has negative power",
                    genesis_val.pub_key
                )));
            }
            let derived = Address::from_public_key(&genesis_val.pub_key);
            match genesis_val.address {
                Some(address) if address != derived => {
                    return Err(ModelsError::InvalidGenesis(format!(
                        "validator address {} does not match its public key",
                        address
                    )));
                }
                Some(_) => {}
                None => genesis_val.address = Some(derived),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corten_signature::KeyPair;

    fn sample() -> GenesisDoc {
        GenesisDoc {
            genesis_time: Timestamp::from_millis(1_650_000_000_000),
            chain_id: "corten-test".into(),
            initial_height: 1,
            consensus_params: None,
            validators: vec![GenesisValidator {
                address: None,
                pub_key: KeyPair::generate().get_public_key(),
                power: 10,
                name: Some("val-0".into()),
            }],
            app_state: serde_json::json!({"balances": {}}),
            app_hash: None,
        }
    }

    #[test]
    fn json_roundtrip_completes_addresses() {
        let genesis = sample();
        let json = genesis.to_json().unwrap();
        let parsed = GenesisDoc::from_json(json.as_bytes()).unwrap();
        assert_eq!(parsed.chain_id, genesis.chain_id);
        let val = &parsed.validators[0];
        assert_eq!(
            val.address.unwrap(),
            Address::from_public_key(&val.pub_key)
        );
    }

    #[test]
    fn missing_initial_height_defaults_to_one() {
        let mut genesis = sample();
        genesis.initial_height = 0;
        genesis.validate_and_complete().unwrap();
        assert_eq!(genesis.initial_height, 1);
    }

    #[test]
    fn oversized_chain_id_rejected() {
        let mut genesis = sample();
        genesis.chain_id = "x".repeat(MAX_CHAIN_ID_LENGTH + 1);
        assert!(genesis.validate_and_complete().is_err());
    }

    #[test]
    fn mismatched_address_rejected() {
        let mut genesis = sample();
        genesis.validators[0].address = Some(Address::from_bytes(&[9u8; 20]));
        assert!(genesis.validate_and_complete().is_err());
    }
}
