use corten_models::block::Tx;
use corten_models::evidence::Evidence;
use tokio::sync::mpsc;

/// Outbound channels of the pool component, wired by the node at startup.
#[derive(Clone, Default)]
pub struct PoolChannels {
    /// Admitted transactions to broadcast to peers, when gossip is enabled.
    pub broadcast_tx: Option<mpsc::Sender<Tx>>,
    /// Freshly verified evidence to broadcast to peers.
    pub broadcast_evidence: Option<mpsc::Sender<Evidence>>,
}
