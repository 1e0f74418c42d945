//! Validator addresses: the first 20 bytes of the SHA-256 digest of the
//! Ed25519 public key.

use crate::error::ModelsError;
use corten_hash::Hash;
use corten_serialization::{Deserializer, SerializeError, Serializer};
use corten_signature::PublicKey;
use nom::{
    error::{context, ContextError, ParseError},
    IResult,
};
use std::str::FromStr;

/// Size of an address in bytes.
pub const ADDRESS_SIZE_BYTES: usize = 20;

/// A validator address.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Address([u8; ADDRESS_SIZE_BYTES]);

impl Address {
    /// Derive the address of an Ed25519 public key.
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let digest = Hash::compute_from(public_key.to_bytes());
        let mut bytes = [0u8; ADDRESS_SIZE_BYTES];
        bytes.copy_from_slice(&digest.to_bytes()[..ADDRESS_SIZE_BYTES]);
        Address(bytes)
    }

    /// Borrow the raw bytes.
    pub fn to_bytes(&self) -> &[u8; ADDRESS_SIZE_BYTES] {
        &self.0
    }

    /// Rebuild from raw bytes.
    pub fn from_bytes(bytes: &[u8; ADDRESS_SIZE_BYTES]) -> Self {
        Address(*bytes)
    }

    /// Rebuild from a slice, checking the length.
    pub fn from_slice(data: &[u8]) -> Result<Self, ModelsError> {
        let bytes: [u8; ADDRESS_SIZE_BYTES] = data.try_into().map_err(|_| {
            ModelsError::DeserializeError(format!("bad address length {}", data.len()))
        })?;
        Ok(Address(bytes))
    }

    /// bs58-check string form.
    pub fn to_bs58_check(&self) -> String {
        bs58::encode(self.0).with_check().into_string()
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_bs58_check())
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_bs58_check())
    }
}

impl FromStr for Address {
    type Err = ModelsError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = bs58::decode(s)
            .with_check(None)
            .into_vec()
            .map_err(|err| ModelsError::DeserializeError(err.to_string()))?;
        Address::from_slice(&decoded)
    }
}

/// Serializer writing an [`Address`] as its raw 20 bytes.
#[derive(Clone, Default)]
pub struct AddressSerializer;

impl AddressSerializer {
    /// Create an address serializer.
    pub const fn new() -> Self {
        Self
    }
}

impl Serializer<Address> for AddressSerializer {
    fn serialize(&self, value: &Address, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        buffer.extend_from_slice(value.to_bytes());
        Ok(())
    }
}

/// Deserializer for [`Address`].
#[derive(Clone, Default)]
pub struct AddressDeserializer;

impl AddressDeserializer {
    /// Create an address deserializer.
    pub const fn new() -> Self {
        Self
    }
}

impl Deserializer<Address> for AddressDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Address, E> {
        context("Failed address deserialization", |input: &'a [u8]| {
            if input.len() < ADDRESS_SIZE_BYTES {
                return Err(nom::Err::Error(ParseError::from_error_kind(
                    input,
                    nom::error::ErrorKind::Eof,
                )));
            }
            let mut bytes = [0u8; ADDRESS_SIZE_BYTES];
            bytes.copy_from_slice(&input[..ADDRESS_SIZE_BYTES]);
            Ok((&input[ADDRESS_SIZE_BYTES..], Address(bytes)))
        })(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corten_signature::KeyPair;
    use nom::error::VerboseError;

    #[test]
    fn derivation_is_deterministic() {
        let public_key = KeyPair::generate().get_public_key();
        assert_eq!(
            Address::from_public_key(&public_key),
            Address::from_public_key(&public_key)
        );
    }

    #[test]
    fn text_and_wire_roundtrip() {
        let address = Address::from_public_key(&KeyPair::generate().get_public_key());
        assert_eq!(Address::from_str(&address.to_bs58_check()).unwrap(), address);

        let mut buffer = Vec::new();
        AddressSerializer::new()
            .serialize(&address, &mut buffer)
            .unwrap();
        let (rest, decoded) = AddressDeserializer::new()
            .deserialize::<VerboseError<&[u8]>>(&buffer)
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, address);
    }
}
