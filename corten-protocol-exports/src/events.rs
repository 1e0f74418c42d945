use corten_models::state::State;

/// Events out of the gossip layer, consumed by the node supervisor.
#[derive(Debug)]
pub enum ProtocolEvent {
    /// Block-sync caught up; consensus should take over from this state.
    SwitchToConsensus {
        /// The state after the last synced block.
        state: Box<State>,
    },
}
