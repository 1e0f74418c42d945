use crate::error::CortenSignatureError;
use corten_serialization::{Deserializer, SerializeError, Serializer};
use ed25519_dalek::{Signer, Verifier};
use nom::{
    error::{context, ContextError, ParseError},
    IResult,
};
use rand::rngs::OsRng;
use std::{cmp::Ordering, hash::Hasher, str::FromStr};

/// Size of a serialized secret key in bytes.
pub const KEYPAIR_SIZE_BYTES: usize = 32;
/// Size of a serialized public key in bytes.
pub const PUBLIC_KEY_SIZE_BYTES: usize = 32;
/// Size of a serialized signature in bytes.
pub const SIGNATURE_SIZE_BYTES: usize = 64;

/// Ed25519 keypair used by validators and by the transport identity.
#[derive(Clone)]
pub struct KeyPair(ed25519_dalek::SigningKey);

impl std::fmt::Display for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_bs58_check())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        // never leak the secret in logs
        write!(f, "KeyPair({})", self.get_public_key())
    }
}

impl KeyPair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        KeyPair(ed25519_dalek::SigningKey::generate(&mut OsRng))
    }

    /// Sign a message with the secret key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.0.sign(message))
    }

    /// Public half of the keypair.
    pub fn get_public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }

    /// Serialize the secret key seed.
    pub fn to_bytes(&self) -> [u8; KEYPAIR_SIZE_BYTES] {
        self.0.to_bytes()
    }

    /// Rebuild from a secret key seed.
    pub fn from_bytes(data: &[u8; KEYPAIR_SIZE_BYTES]) -> Self {
        KeyPair(ed25519_dalek::SigningKey::from_bytes(data))
    }

    /// bs58-check form of the secret key seed.
    pub fn to_bs58_check(&self) -> String {
        bs58::encode(self.to_bytes()).with_check().into_string()
    }

    /// Rebuild from a bs58-check string.
    pub fn from_bs58_check(data: &str) -> Result<Self, CortenSignatureError> {
        let decoded = bs58::decode(data)
            .with_check(None)
            .into_vec()
            .map_err(|err| CortenSignatureError::ParsingError(err.to_string()))?;
        let bytes: [u8; KEYPAIR_SIZE_BYTES] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| CortenSignatureError::WrongSize(KEYPAIR_SIZE_BYTES, decoded.len()))?;
        Ok(KeyPair::from_bytes(&bytes))
    }
}

impl FromStr for KeyPair {
    type Err = CortenSignatureError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KeyPair::from_bs58_check(s)
    }
}

impl serde::Serialize for KeyPair {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_bs58_check())
    }
}

impl<'de> serde::Deserialize<'de> for KeyPair {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        KeyPair::from_bs58_check(&text).map_err(serde::de::Error::custom)
    }
}

/// Ed25519 public key.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct PublicKey(ed25519_dalek::VerifyingKey);

impl PublicKey {
    /// Verify `signature` over `message`.
    pub fn verify(
        &self,
        message: &[u8],
        signature: &Signature,
    ) -> Result<(), CortenSignatureError> {
        self.0
            .verify(message, &signature.0)
            .map_err(|err| CortenSignatureError::VerificationError(err.to_string()))
    }

    /// Borrow the compressed point bytes.
    pub fn to_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE_BYTES] {
        self.0.as_bytes()
    }

    /// Rebuild from compressed point bytes.
    pub fn from_bytes(data: &[u8; PUBLIC_KEY_SIZE_BYTES]) -> Result<Self, CortenSignatureError> {
        ed25519_dalek::VerifyingKey::from_bytes(data)
            .map(PublicKey)
            .map_err(|err| CortenSignatureError::ParsingError(err.to_string()))
    }

    /// bs58-check string form.
    pub fn to_bs58_check(&self) -> String {
        bs58::encode(self.to_bytes()).with_check().into_string()
    }

    /// Rebuild from a bs58-check string.
    pub fn from_bs58_check(data: &str) -> Result<Self, CortenSignatureError> {
        let decoded = bs58::decode(data)
            .with_check(None)
            .into_vec()
            .map_err(|err| CortenSignatureError::ParsingError(err.to_string()))?;
        let bytes: [u8; PUBLIC_KEY_SIZE_BYTES] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| CortenSignatureError::WrongSize(PUBLIC_KEY_SIZE_BYTES, decoded.len()))?;
        PublicKey::from_bytes(&bytes)
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_bs58_check())
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_bs58_check())
    }
}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_bytes().cmp(other.to_bytes())
    }
}

impl std::hash::Hash for PublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_bytes().hash(state);
    }
}

impl FromStr for PublicKey {
    type Err = CortenSignatureError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PublicKey::from_bs58_check(s)
    }
}

impl serde::Serialize for PublicKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_bs58_check())
    }
}

impl<'de> serde::Deserialize<'de> for PublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        PublicKey::from_bs58_check(&text).map_err(serde::de::Error::custom)
    }
}

/// Deserializer for [`PublicKey`].
#[derive(Clone, Default)]
pub struct PublicKeyDeserializer;

impl PublicKeyDeserializer {
    /// Create a public key deserializer.
    pub const fn new() -> Self {
        Self
    }
}

impl Deserializer<PublicKey> for PublicKeyDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], PublicKey, E> {
        context("Failed public key deserialization", |input: &'a [u8]| {
            if input.len() < PUBLIC_KEY_SIZE_BYTES {
                return Err(nom::Err::Error(ParseError::from_error_kind(
                    input,
                    nom::error::ErrorKind::Eof,
                )));
            }
            let mut bytes = [0u8; PUBLIC_KEY_SIZE_BYTES];
            bytes.copy_from_slice(&input[..PUBLIC_KEY_SIZE_BYTES]);
            let key = PublicKey::from_bytes(&bytes).map_err(|_| {
                nom::Err::Error(ParseError::from_error_kind(
                    input,
                    nom::error::ErrorKind::Fail,
                ))
            })?;
            Ok((&input[PUBLIC_KEY_SIZE_BYTES..], key))
        })(buffer)
    }
}

/// Ed25519 signature.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Signature(ed25519_dalek::Signature);

impl Signature {
    /// Serialize into 64 bytes.
    pub fn to_bytes(&self) -> [u8; SIGNATURE_SIZE_BYTES] {
        self.0.to_bytes()
    }

    /// Rebuild from 64 bytes.
    pub fn from_bytes(data: &[u8; SIGNATURE_SIZE_BYTES]) -> Self {
        Signature(ed25519_dalek::Signature::from_bytes(data))
    }

    /// Rebuild from a slice, checking the length.
    pub fn from_slice(data: &[u8]) -> Result<Self, CortenSignatureError> {
        let bytes: [u8; SIGNATURE_SIZE_BYTES] = data
            .try_into()
            .map_err(|_| CortenSignatureError::WrongSize(SIGNATURE_SIZE_BYTES, data.len()))?;
        Ok(Signature::from_bytes(&bytes))
    }

    /// bs58-check string form.
    pub fn to_bs58_check(&self) -> String {
        bs58::encode(self.to_bytes()).with_check().into_string()
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_bs58_check())
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_bs58_check())
    }
}

impl serde::Serialize for Signature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_bs58_check())
    }
}

impl<'de> serde::Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let decoded = bs58::decode(&text)
            .with_check(None)
            .into_vec()
            .map_err(serde::de::Error::custom)?;
        Signature::from_slice(&decoded).map_err(serde::de::Error::custom)
    }
}

/// Deserializer for [`Signature`].
#[derive(Clone, Default)]
pub struct SignatureDeserializer;

impl SignatureDeserializer {
    /// Create a signature deserializer.
    pub const fn new() -> Self {
        Self
    }
}

impl Deserializer<Signature> for SignatureDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Signature, E> {
        context("Failed signature deserialization", |input: &'a [u8]| {
            if input.len() < SIGNATURE_SIZE_BYTES {
                return Err(nom::Err::Error(ParseError::from_error_kind(
                    input,
                    nom::error::ErrorKind::Eof,
                )));
            }
            let mut bytes = [0u8; SIGNATURE_SIZE_BYTES];
            bytes.copy_from_slice(&input[..SIGNATURE_SIZE_BYTES]);
            Ok((&input[SIGNATURE_SIZE_BYTES..], Signature::from_bytes(&bytes)))
        })(buffer)
    }
}

/// Serializer writing a [`PublicKey`] as its raw 32 bytes.
#[derive(Clone, Default)]
pub struct PublicKeySerializer;

impl PublicKeySerializer {
    /// Create a public key serializer.
    pub const fn new() -> Self {
        Self
    }
}

impl Serializer<PublicKey> for PublicKeySerializer {
    fn serialize(&self, value: &PublicKey, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        buffer.extend_from_slice(value.to_bytes());
        Ok(())
    }
}

/// Verify a batch of `(message, signature, public_key)` triples, failing on
/// the first mismatch.
pub fn verify_signature_batch(
    batch: &[(&[u8], Signature, PublicKey)],
) -> Result<(), CortenSignatureError> {
    for (message, signature, public_key) in batch {
        public_key.verify(message, signature)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nom::error::VerboseError;

    #[test]
    fn sign_and_verify() {
        let keypair = KeyPair::generate();
        let signature = keypair.sign(b"message");
        keypair
            .get_public_key()
            .verify(b"message", &signature)
            .unwrap();
        assert!(keypair
            .get_public_key()
            .verify(b"other", &signature)
            .is_err());
    }

    #[test]
    fn keypair_text_roundtrip() {
        let keypair = KeyPair::generate();
        let restored = KeyPair::from_bs58_check(&keypair.to_bs58_check()).unwrap();
        assert_eq!(restored.to_bytes(), keypair.to_bytes());
    }

    #[test]
    fn public_key_wire_roundtrip() {
        let public_key = KeyPair::generate().get_public_key();
        let (rest, decoded) = PublicKeyDeserializer::new()
            .deserialize::<VerboseError<&[u8]>>(public_key.to_bytes())
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, public_key);
    }

    #[test]
    fn batch_verification() {
        let keypair_a = KeyPair::generate();
        let keypair_b = KeyPair::generate();
        let sig_a = keypair_a.sign(b"a");
        let sig_b = keypair_b.sign(b"b");
        verify_signature_batch(&[
            (b"a".as_slice(), sig_a, keypair_a.get_public_key()),
            (b"b".as_slice(), sig_b, keypair_b.get_public_key()),
        ])
        .unwrap();
        assert!(verify_signature_batch(&[(
            b"a".as_slice(),
            sig_b,
            keypair_a.get_public_key()
        )])
        .is_err());
    }
}
