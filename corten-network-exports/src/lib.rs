//! Interfaces of the authenticated peer transport: configuration, errors,
//! peer identity, gossip channel identifiers, commands/events, and the
//! connection establisher.

#![warn(unused_crate_dependencies)]

mod channel_id;
mod commands;
mod error;
mod establisher;
mod peers;
mod settings;

pub use channel_id::ChannelId;
pub use commands::{NetworkCommand, NetworkEvent};
pub use error::{NetworkError, NetworkResult};
pub use establisher::{Connector, Establisher, Listener};
pub use peers::{ConnectionClosureReason, ConnectionId, PeerId};
pub use settings::NetworkConfig;
