//! Ed25519 signature management: keypairs, public keys, signatures, their
//! text and wire forms, and batch verification.

#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]

mod error;
mod signature_impl;

pub use error::CortenSignatureError;
pub use signature_impl::{
    verify_signature_batch, KeyPair, PublicKey, PublicKeyDeserializer, PublicKeySerializer,
    Signature, SignatureDeserializer, KEYPAIR_SIZE_BYTES, PUBLIC_KEY_SIZE_BYTES,
    SIGNATURE_SIZE_BYTES,
};
