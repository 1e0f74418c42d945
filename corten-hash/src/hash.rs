use crate::error::CortenHashError;
use blake2::digest::consts::U32;
use blake2::Blake2b;
use corten_serialization::{Deserializer, SerializeError, Serializer};
use nom::{
    error::{context, ContextError, ParseError},
    IResult,
};
use sha2::{Digest, Sha256};
use std::{cmp::Ordering, str::FromStr};

/// Size of a [`Hash`] in bytes.
pub const HASH_SIZE_BYTES: usize = 32;

/// SHA-256 digest newtype. Every consensus-level identifier (block hash,
/// part-set root, evidence hash, transaction hash) is one of these.
#[derive(Eq, PartialEq, Copy, Clone, Hash, serde::Serialize, serde::Deserialize)]
pub struct Hash([u8; HASH_SIZE_BYTES]);

impl PartialOrd for Hash {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Hash {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_bs58_check())
    }
}

impl std::fmt::Debug for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_bs58_check())
    }
}

impl Default for Hash {
    fn default() -> Self {
        Hash::ZERO
    }
}

impl Hash {
    /// The all-zero hash, used as the nil marker in block ids and part-set
    /// headers.
    pub const ZERO: Hash = Hash([0u8; HASH_SIZE_BYTES]);

    /// Compute the SHA-256 digest of `data`.
    pub fn compute_from(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Hash(hasher.finalize().into())
    }

    /// Compute the SHA-256 digest of the concatenation of several slices.
    pub fn compute_from_tuple(data: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for part in data {
            hasher.update(part);
        }
        Hash(hasher.finalize().into())
    }

    /// True for the all-zero nil marker.
    pub fn is_zero(&self) -> bool {
        *self == Hash::ZERO
    }

    /// bs58-check string form.
    pub fn to_bs58_check(&self) -> String {
        bs58::encode(self.to_bytes()).with_check().into_string()
    }

    /// Borrow the digest bytes.
    pub fn to_bytes(&self) -> &[u8; HASH_SIZE_BYTES] {
        &self.0
    }

    /// Consume into the digest bytes.
    pub fn into_bytes(self) -> [u8; HASH_SIZE_BYTES] {
        self.0
    }

    /// Rebuild from digest bytes.
    pub fn from_bytes(data: &[u8; HASH_SIZE_BYTES]) -> Self {
        Hash(*data)
    }

    /// Rebuild from a slice, checking the length.
    pub fn from_slice(data: &[u8]) -> Result<Self, CortenHashError> {
        let bytes: [u8; HASH_SIZE_BYTES] = data
            .try_into()
            .map_err(|_| CortenHashError::WrongSize(HASH_SIZE_BYTES, data.len()))?;
        Ok(Hash(bytes))
    }

    /// Rebuild from a bs58-check string.
    pub fn from_bs58_check(data: &str) -> Result<Self, CortenHashError> {
        let decoded = bs58::decode(data)
            .with_check(None)
            .into_vec()
            .map_err(|err| CortenHashError::ParsingError(err.to_string()))?;
        Hash::from_slice(&decoded)
    }

    /// Hex string form, used for map keys and logs.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|byte| format!("{:02x}", byte)).collect()
    }
}

impl FromStr for Hash {
    type Err = CortenHashError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hash::from_bs58_check(s)
    }
}

/// Raw 32-byte serializer for [`Hash`].
#[derive(Clone, Default)]
pub struct HashSerializer;

impl HashSerializer {
    /// Create a hash serializer.
    pub const fn new() -> Self {
        Self
    }
}

impl Serializer<Hash> for HashSerializer {
    fn serialize(&self, value: &Hash, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        buffer.extend_from_slice(value.to_bytes());
        Ok(())
    }
}

/// Raw 32-byte deserializer for [`Hash`].
#[derive(Clone, Default)]
pub struct HashDeserializer;

impl HashDeserializer {
    /// Create a hash deserializer.
    pub const fn new() -> Self {
        Self
    }
}

impl Deserializer<Hash> for HashDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Hash, E> {
        context("Failed hash deserialization", |input: &'a [u8]| {
            if input.len() < HASH_SIZE_BYTES {
                return Err(nom::Err::Error(ParseError::from_error_kind(
                    input,
                    nom::error::ErrorKind::Eof,
                )));
            }
            let mut bytes = [0u8; HASH_SIZE_BYTES];
            bytes.copy_from_slice(&input[..HASH_SIZE_BYTES]);
            Ok((&input[HASH_SIZE_BYTES..], Hash::from_bytes(&bytes)))
        })(buffer)
    }
}

/// BLAKE2b-256 digest of `data`, kept for application payload digests.
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nom::error::VerboseError;

    #[test]
    fn bs58_check_roundtrip() {
        let hash = Hash::compute_from(b"corten");
        let text = hash.to_bs58_check();
        assert_eq!(Hash::from_bs58_check(&text).unwrap(), hash);
        assert_eq!(Hash::from_str(&text).unwrap(), hash);
    }

    #[test]
    fn serializer_roundtrip() {
        let hash = Hash::compute_from(b"roundtrip");
        let mut buffer = Vec::new();
        HashSerializer::new().serialize(&hash, &mut buffer).unwrap();
        let (rest, decoded) = HashDeserializer::new()
            .deserialize::<VerboseError<&[u8]>>(&buffer)
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, hash);
    }

    #[test]
    fn zero_marker() {
        assert!(Hash::ZERO.is_zero());
        assert!(!Hash::compute_from(b"x").is_zero());
    }

    #[test]
    fn blake2b_distinct_from_sha256() {
        assert_ne!(&blake2b_256(b"data"), Hash::compute_from(b"data").to_bytes());
    }
}
