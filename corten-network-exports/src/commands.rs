use crate::channel_id::ChannelId;
use crate::peers::{ConnectionClosureReason, PeerId};
use std::net::SocketAddr;

/// Commands into the network worker.
#[derive(Debug)]
pub enum NetworkCommand {
    /// Send one logical message to a peer on a channel.
    SendMessage {
        /// Destination peer.
        peer_id: PeerId,
        /// Gossip channel.
        channel: ChannelId,
        /// Full logical message bytes.
        data: Vec<u8>,
    },
    /// Send one logical message to every connected peer.
    Broadcast {
        /// Gossip channel.
        channel: ChannelId,
        /// Full logical message bytes.
        data: Vec<u8>,
    },
    /// Dial an address now.
    Dial {
        /// Address to dial.
        address: SocketAddr,
    },
    /// Ban a peer and drop its connections.
    Ban {
        /// Peer to ban.
        peer_id: PeerId,
    },
    /// Close a connection gracefully.
    Close {
        /// Peer to disconnect.
        peer_id: PeerId,
    },
}

/// Events out of the network worker.
#[derive(Debug)]
pub enum NetworkEvent {
    /// A handshaked connection is ready.
    PeerConnected {
        /// The peer.
        peer_id: PeerId,
        /// Remote address.
        address: SocketAddr,
        /// True when this node dialed.
        outbound: bool,
    },
    /// A connection ended.
    PeerDisconnected {
        /// The peer.
        peer_id: PeerId,
        /// Why.
        reason: ConnectionClosureReason,
    },
    /// A complete logical message arrived.
    MessageReceived {
        /// Sending peer.
        peer_id: PeerId,
        /// Gossip channel.
        channel: ChannelId,
        /// Reassembled message bytes.
        data: Vec<u8>,
    },
}
