//! The consensus state machine: the propose / prevote / precommit / commit
//! pipeline with locking and proof-of-lock, driven by a single task over a
//! mailbox of peer messages, internal messages, and scheduled timeouts, with
//! a write-ahead log making every decision recoverable.

#![warn(unused_crate_dependencies)]

mod height_vote_set;
mod round_state;
mod wal;
mod worker;

#[cfg(test)]
mod tests;

pub use height_vote_set::HeightVoteSet;
pub use round_state::RoundState;
pub use wal::{TimedWalMessage, TimeoutInfo, Wal, WalMessage};
pub use worker::{start_consensus_worker, ConsensusManager, ConsensusWorker};
