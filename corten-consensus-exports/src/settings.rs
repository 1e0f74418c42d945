use corten_models::Round;
use corten_time::Timestamp;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One step of the per-round pipeline. The ordering is meaningful: a node
/// never moves backwards within a round.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RoundStep {
    /// Waiting for the commit timeout before starting the next height.
    NewHeight,
    /// Entering a fresh round.
    NewRound,
    /// Waiting for (or producing) the proposal.
    Propose,
    /// Prevote sent, collecting prevotes.
    Prevote,
    /// +2/3 prevotes for anything seen, waiting for a block majority.
    PrevoteWait,
    /// Precommit sent, collecting precommits.
    Precommit,
    /// +2/3 precommits for anything seen, waiting for a block majority.
    PrecommitWait,
    /// +2/3 precommits for one block, waiting for its parts.
    Commit,
}

impl std::fmt::Display for RoundStep {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            RoundStep::NewHeight => "new_height",
            RoundStep::NewRound => "new_round",
            RoundStep::Propose => "propose",
            RoundStep::Prevote => "prevote",
            RoundStep::PrevoteWait => "prevote_wait",
            RoundStep::Precommit => "precommit",
            RoundStep::PrecommitWait => "precommit_wait",
            RoundStep::Commit => "commit",
        };
        write!(f, "{}", name)
    }
}

/// Consensus timing and behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Base wait for a proposal in round 0.
    pub timeout_propose: Timestamp,
    /// Additional proposal wait per round.
    pub timeout_propose_delta: Timestamp,
    /// Base wait after +2/3 any prevotes.
    pub timeout_prevote: Timestamp,
    /// Additional prevote wait per round.
    pub timeout_prevote_delta: Timestamp,
    /// Base wait after +2/3 any precommits.
    pub timeout_precommit: Timestamp,
    /// Additional precommit wait per round.
    pub timeout_precommit_delta: Timestamp,
    /// Wait after a commit before moving to the next height, giving
    /// stragglers time to be included in the seen commit.
    pub timeout_commit: Timestamp,
    /// Skip the commit timeout once all validators have precommitted.
    pub skip_timeout_commit: bool,
    /// Propose empty blocks when the pool is empty.
    pub create_empty_blocks: bool,
    /// Sleep between peer gossip attempts.
    pub peer_gossip_sleep: Timestamp,
    /// Sleep between +2/3 queries to peers.
    pub peer_query_maj23_sleep: Timestamp,
    /// Directory holding the write-ahead log.
    pub wal_path: PathBuf,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        ConsensusConfig {
            timeout_propose: Timestamp::from_millis(3_000),
            timeout_propose_delta: Timestamp::from_millis(500),
            timeout_prevote: Timestamp::from_millis(1_000),
            timeout_prevote_delta: Timestamp::from_millis(500),
            timeout_precommit: Timestamp::from_millis(1_000),
            timeout_precommit_delta: Timestamp::from_millis(500),
            timeout_commit: Timestamp::from_millis(1_000),
            skip_timeout_commit: false,
            create_empty_blocks: true,
            peer_gossip_sleep: Timestamp::from_millis(100),
            peer_query_maj23_sleep: Timestamp::from_millis(2_000),
            wal_path: PathBuf::from("wal"),
        }
    }
}

impl ConsensusConfig {
    /// Proposal wait for `round`.
    pub fn propose_timeout(&self, round: Round) -> Timestamp {
        self.timeout_propose
            .saturating_add(scale(self.timeout_propose_delta, round))
    }

    /// Prevote wait for `round`.
    pub fn prevote_timeout(&self, round: Round) -> Timestamp {
        self.timeout_prevote
            .saturating_add(scale(self.timeout_prevote_delta, round))
    }

    /// Precommit wait for `round`.
    pub fn precommit_timeout(&self, round: Round) -> Timestamp {
        self.timeout_precommit
            .saturating_add(scale(self.timeout_precommit_delta, round))
    }
}

fn scale(delta: Timestamp, round: Round) -> Timestamp {
    delta
        .checked_mul(round.max(0) as u64)
        .unwrap_or(Timestamp::from_millis(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_grow_per_round() {
        let config = ConsensusConfig::default();
        assert_eq!(config.propose_timeout(0).as_millis(), 3_000);
        assert_eq!(config.propose_timeout(2).as_millis(), 4_000);
        assert_eq!(config.prevote_timeout(1).as_millis(), 1_500);
        assert_eq!(config.precommit_timeout(3).as_millis(), 2_500);
    }

    #[test]
    fn steps_are_ordered() {
        assert!(RoundStep::NewHeight < RoundStep::Propose);
        assert!(RoundStep::Propose < RoundStep::Prevote);
        assert!(RoundStep::PrecommitWait < RoundStep::Commit);
    }
}
