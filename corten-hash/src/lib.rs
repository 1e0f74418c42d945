//! Hashing primitives: the 32-byte SHA-256 [`Hash`] used for every consensus
//! digest, a BLAKE2b-256 convenience digest for application payloads, and the
//! Merkle tree used for part sets, evidence lists, and header fields.

#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]

mod error;
mod hash;
pub mod merkle;

pub use error::CortenHashError;
pub use hash::{blake2b_256, Hash, HashDeserializer, HashSerializer, HASH_SIZE_BYTES};
