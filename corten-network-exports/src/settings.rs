use corten_time::Timestamp;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Address the listener binds to.
    pub bind: SocketAddr,
    /// Addresses dialed at startup and on reconnect.
    pub bootstrap_peers: Vec<SocketAddr>,
    /// Maximum simultaneous inbound connections.
    pub max_clients: usize,
    /// Maximum connections per remote IP.
    pub max_nodes_per_host: usize,
    /// Ping cadence per connection.
    pub keepalive_interval: Timestamp,
    /// A connection without any inbound message for this long is closed.
    pub heartbeat_timeout: Timestamp,
    /// Station-to-station handshake deadline.
    pub handshake_timeout: Timestamp,
    /// First reconnection delay after a dial failure.
    pub backoff_base: Timestamp,
    /// Reconnection delay cap.
    pub backoff_max: Timestamp,
    /// Deadline for one message write on a connection.
    pub message_timeout: Timestamp,
    /// Largest accepted logical message, bytes.
    pub max_message_size: u32,
    /// Largest gossip packet payload carried in one wire packet, bytes.
    pub max_packet_payload_size: usize,
    /// Per-connection outbound queue length.
    pub node_send_channel_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            bind: "0.0.0.0:26656".parse().expect("valid default bind"),
            bootstrap_peers: Vec::new(),
            max_clients: 64,
            max_nodes_per_host: 4,
            keepalive_interval: Timestamp::from_millis(60_000),
            heartbeat_timeout: Timestamp::from_millis(90_000),
            handshake_timeout: Timestamp::from_millis(20_000),
            backoff_base: Timestamp::from_millis(1_000),
            backoff_max: Timestamp::from_millis(60_000),
            message_timeout: Timestamp::from_millis(10_000),
            max_message_size: 22 * 1024 * 1024,
            max_packet_payload_size: 1_400,
            node_send_channel_size: 1_024,
        }
    }
}
