use corten_time::Timestamp;
use serde::{Deserialize, Serialize};

/// Gossip-layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Cadence of block-sync status broadcasts.
    pub status_update_interval: Timestamp,
    /// Cadence of ordered-apply attempts while syncing.
    pub try_sync_interval: Timestamp,
    /// Cadence of the switch-to-consensus check.
    pub switch_to_consensus_interval: Timestamp,
    /// Deadline of one in-flight block request.
    pub sync_timeout: Timestamp,
    /// Switch to consensus once `max_peer_height - height` is at most this.
    pub switch_threshold: i64,
    /// Maximum in-flight block requests per peer.
    pub max_pending_per_peer: usize,
    /// Number of heights requested ahead of the applied one.
    pub request_window: i64,
    /// Sleep between peer gossip rounds.
    pub peer_gossip_sleep: Timestamp,
    /// Sleep between +2/3 queries to peers.
    pub peer_query_maj23_sleep: Timestamp,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            status_update_interval: Timestamp::from_millis(10_000),
            try_sync_interval: Timestamp::from_millis(10),
            switch_to_consensus_interval: Timestamp::from_millis(1_000),
            sync_timeout: Timestamp::from_millis(60_000),
            switch_threshold: 1,
            max_pending_per_peer: 20,
            request_window: 64,
            peer_gossip_sleep: Timestamp::from_millis(100),
            peer_query_maj23_sleep: Timestamp::from_millis(2_000),
        }
    }
}
