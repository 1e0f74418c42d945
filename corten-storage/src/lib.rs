//! Persistence of blocks and consensus state over the abstract key-value
//! store: the block store (parts, metadata, commits, hash index, pruning)
//! and the state store (snapshots, per-height validator sets and parameters,
//! application-interface responses).

#![warn(unused_crate_dependencies)]

mod block_store;
mod error;
mod keys;
mod state_store;

pub use block_store::BlockStore;
pub use error::StoreError;
pub use state_store::StateStore;
