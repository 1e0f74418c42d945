//! Key layout of the block and state stores. Heights are big-endian so that
//! the natural key order of the backing store is height order.

use corten_hash::Hash;
use corten_models::Height;

pub const PREFIX_BLOCK_META: u8 = 0x00;
pub const PREFIX_BLOCK_PART: u8 = 0x01;
pub const PREFIX_BLOCK_COMMIT: u8 = 0x02;
pub const PREFIX_SEEN_COMMIT: u8 = 0x03;
pub const PREFIX_BLOCK_HASH: u8 = 0x04;
pub const PREFIX_STATE: u8 = 0x05;
pub const PREFIX_VALIDATORS: u8 = 0x06;
pub const PREFIX_CONSENSUS_PARAMS: u8 = 0x07;
pub const PREFIX_ABCI_RESPONSES: u8 = 0x08;

pub fn height_key(prefix: u8, height: Height) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(prefix);
    key.extend_from_slice(&(height as u64).to_be_bytes());
    key
}

pub fn part_key(height: Height, index: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(17);
    key.push(PREFIX_BLOCK_PART);
    key.extend_from_slice(&(height as u64).to_be_bytes());
    key.extend_from_slice(&(index as u64).to_be_bytes());
    key
}

pub fn hash_key(hash: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(PREFIX_BLOCK_HASH);
    key.extend_from_slice(hash.to_bytes());
    key
}

pub fn seen_commit_key() -> Vec<u8> {
    vec![PREFIX_SEEN_COMMIT]
}

pub fn state_key() -> Vec<u8> {
    vec![PREFIX_STATE]
}

/// Decode the height suffix of a prefixed key.
pub fn decode_height_key(key: &[u8]) -> Option<Height> {
    if key.len() != 9 {
        return None;
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&key[1..9]);
    Some(u64::from_be_bytes(bytes) as Height)
}
