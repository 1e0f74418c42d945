//! The authenticated peer transport: a station-to-station handshake
//! yielding an encrypted, sealed-frame channel, packet framing with
//! channel/EOF reassembly on top, per-peer connection workers with
//! keepalive, a peer database with dial backoff, and the listener/dialer
//! worker tying it together.

#![warn(unused_crate_dependencies)]

mod binders;
mod handshake_worker;
mod messages;
mod network_worker;
mod node_worker;
mod peer_info_database;
mod secret_connection;


pub use binders::{ReadBinder, WriteBinder};
pub use handshake_worker::perform_handshake;
pub use messages::Packet;
pub use network_worker::{start_network_worker, NetworkManager};
pub use node_worker::{NodeCommand, NodeEvent, NodeEventType, NodeWorker};
pub use peer_info_database::PeerInfoDatabase;
pub use secret_connection::{SecretReader, SecretWriter, TOTAL_FRAME_SIZE};
