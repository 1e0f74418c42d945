//! The gossip layer: dispatches decoded channel traffic between the network
//! worker and the consensus, pool, and block-sync components, tracks what
//! every peer knows, and catches lagging nodes up through the block-sync
//! reactor before handing them to consensus.

#![warn(unused_crate_dependencies)]

mod block_sync;
mod peer_state;
mod worker;

#[cfg(test)]
mod tests;

pub use block_sync::BlockPool;
pub use peer_state::PeerRoundState;
pub use worker::{start_protocol_worker, ProtocolChannels, ProtocolManager};
