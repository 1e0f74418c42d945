//! The pool worker hosts the two admission buffers of the node: the
//! gas/nonce-ordered transaction pool feeding block proposals, and the
//! evidence pool staging proof of byzantine behavior until it can be
//! committed.

#![warn(unused_crate_dependencies)]

mod evidence_pool;
mod tx_pool;
mod types;
mod worker;

#[cfg(test)]
mod tests;

pub use evidence_pool::EvidencePool;
pub use tx_pool::TxPool;
pub use types::WrappedTx;
pub use worker::{start_pool_worker, PoolManager};
