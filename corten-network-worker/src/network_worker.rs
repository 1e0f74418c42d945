//! The transport worker: listener, dialer, handshake dispatch, and the
//! routing table of live connections.

use crate::handshake_worker::perform_handshake;
use crate::node_worker::{NodeCommand, NodeEvent, NodeEventType, NodeWorker};
use crate::peer_info_database::PeerInfoDatabase;
use corten_network_exports::{
    ConnectionClosureReason, Establisher, NetworkCommand, NetworkConfig, NetworkEvent,
    NetworkResult, PeerId,
};
use corten_signature::KeyPair;
use corten_time::Timestamp;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DIAL_TICK_MS: u64 = 500;

struct ActiveNode {
    command_tx: mpsc::Sender<NodeCommand>,
    address: SocketAddr,
    inbound: bool,
    handle: JoinHandle<()>,
}

struct HandshakeOutcome {
    address: SocketAddr,
    inbound: bool,
    result: NetworkResult<(
        PeerId,
        crate::binders::ReadBinder<tokio::io::ReadHalf<TcpStream>>,
        crate::binders::WriteBinder<tokio::io::WriteHalf<TcpStream>>,
    )>,
}

/// Handle used to stop the network worker.
pub struct NetworkManager {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl NetworkManager {
    /// Stop the worker: close the listener, cancel timers, close every
    /// connection, and drain.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(()).await;
        let _ = self.handle.await;
        info!("network worker stopped");
    }
}

/// Bind the listener and spawn the network worker. Returns the command
/// channel, the event stream, the bound address, and the stop handle.
pub async fn start_network_worker(
    config: NetworkConfig,
    local_key: KeyPair,
) -> NetworkResult<(
    mpsc::Sender<NetworkCommand>,
    mpsc::Receiver<NetworkEvent>,
    SocketAddr,
    NetworkManager,
)> {
    let mut establisher = Establisher::new();
    let mut listener = establisher.get_listener(config.bind).await?;
    let local_addr = listener.local_addr()?;
    info!(%local_addr, "network listener bound");

    let (command_tx, mut command_rx) = mpsc::channel::<NetworkCommand>(1024);
    let (event_tx, event_rx) = mpsc::channel::<NetworkEvent>(1024);
    let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);

    let handle = tokio::spawn(async move {
        let mut peer_db = PeerInfoDatabase::new(config.clone());
        let mut active: HashMap<PeerId, ActiveNode> = HashMap::new();
        let (node_event_tx, mut node_event_rx) = mpsc::channel::<NodeEvent>(1024);
        let (handshake_tx, mut handshake_rx) = mpsc::channel::<HandshakeOutcome>(64);
        let mut dial_tick =
            tokio::time::interval(std::time::Duration::from_millis(DIAL_TICK_MS));
        let mut connector = match establisher.get_connector(config.handshake_timeout).await {
            Ok(connector) => connector,
            Err(err) => {
                warn!("no connector available: {}", err);
                return;
            }
        };

        loop {
            tokio::select! {
                _ = stop_rx.recv() => break,

                accepted = listener.accept() => match accepted {
                    Err(err) => {
                        warn!("listener accept failed: {}", err);
                    }
                    Ok((stream, address)) => {
                        if !peer_db.try_accept_inbound(address) {
                            debug!(%address, "inbound connection refused by caps");
                            continue;
                        }
                        spawn_handshake(
                            config.clone(),
                            local_key.clone(),
                            stream,
                            address,
                            true,
                            handshake_tx.clone(),
                        );
                    }
                },

                _ = dial_tick.tick() => {
                    let now = Timestamp::now().unwrap_or(Timestamp::ZERO);
                    let connected: Vec<SocketAddr> =
                        active.values().map(|node| node.address).collect();
                    if let Some(address) = peer_db
                        .out_connection_candidate(now)
                        .filter(|candidate| !connected.contains(candidate))
                    {
                        peer_db.note_attempt(address, now);
                        match connector.connect(address).await {
                            Ok(stream) => {
                                peer_db.note_outbound_open(address);
                                spawn_handshake(
                                    config.clone(),
                                    local_key.clone(),
                                    stream,
                                    address,
                                    false,
                                    handshake_tx.clone(),
                                );
                            }
                            Err(err) => {
                                debug!(%address, "dial failed: {}", err);
                                peer_db.note_failure(address, now);
                            }
                        }
                    }
                }

                Some(outcome) = handshake_rx.recv() => {
                    let now = Timestamp::now().unwrap_or(Timestamp::ZERO);
                    match outcome.result {
                        Err(err) => {
                            debug!(address = %outcome.address, "handshake failed: {}", err);
                            peer_db.note_failure(outcome.address, now);
                            peer_db.note_closed(outcome.address, outcome.inbound);
                        }
                        Ok((peer_id, read_binder, write_binder)) => {
                            if peer_db.is_banned(&peer_id) || active.contains_key(&peer_id) {
                                debug!(%peer_id, "dropping banned or duplicate connection");
                                peer_db.note_closed(outcome.address, outcome.inbound);
                                continue;
                            }
                            peer_db.note_success(outcome.address, now);
                            let (node_command_tx, node_command_rx) =
                                mpsc::channel(config.node_send_channel_size);
                            let worker = NodeWorker::new(
                                config.clone(),
                                peer_id,
                                read_binder,
                                write_binder,
                                node_command_rx,
                                node_event_tx.clone(),
                            );
                            let handle = tokio::spawn(async move {
                                let _ = worker.run_loop().await;
                            });
                            active.insert(peer_id, ActiveNode {
                                command_tx: node_command_tx,
                                address: outcome.address,
                                inbound: outcome.inbound,
                                handle,
                            });
                            let _ = event_tx.send(NetworkEvent::PeerConnected {
                                peer_id,
                                address: outcome.address,
                                outbound: !outcome.inbound,
                            }).await;
                        }
                    }
                }

                Some(node_event) = node_event_rx.recv() => {
                    match node_event.event {
                        NodeEventType::Received { channel, data } => {
                            let _ = event_tx.send(NetworkEvent::MessageReceived {
                                peer_id: node_event.peer_id,
                                channel,
                                data,
                            }).await;
                        }
                        NodeEventType::Closed(reason) => {
                            if let Some(node) = active.remove(&node_event.peer_id) {
                                peer_db.note_closed(node.address, node.inbound);
                                let _ = node.handle.await;
                            }
                            let _ = event_tx.send(NetworkEvent::PeerDisconnected {
                                peer_id: node_event.peer_id,
                                reason,
                            }).await;
                        }
                    }
                }

                Some(command) = command_rx.recv() => {
                    handle_command(command, &mut active, &mut peer_db).await;
                }
            }
        }

        // orderly shutdown: close every connection and drain their workers
        for (_, node) in active.drain() {
            let _ = node
                .command_tx
                .send(NodeCommand::Close(ConnectionClosureReason::Normal))
                .await;
            let _ = node.handle.await;
        }
    });

    Ok((command_tx, event_rx, local_addr, NetworkManager { stop_tx, handle }))
}

fn spawn_handshake(
    config: NetworkConfig,
    local_key: KeyPair,
    stream: TcpStream,
    address: SocketAddr,
    inbound: bool,
    outcome_tx: mpsc::Sender<HandshakeOutcome>,
) {
    tokio::spawn(async move {
        let result = perform_handshake(&config, &local_key, stream).await;
        let _ = outcome_tx
            .send(HandshakeOutcome {
                address,
                inbound,
                result,
            })
            .await;
    });
}

async fn handle_command(
    command: NetworkCommand,
    active: &mut HashMap<PeerId, ActiveNode>,
    peer_db: &mut PeerInfoDatabase,
) {
    match command {
        NetworkCommand::SendMessage {
            peer_id,
            channel,
            data,
        } => {
            if let Some(node) = active.get(&peer_id) {
                if node
                    .command_tx
                    .send(NodeCommand::SendMessage { channel, data })
                    .await
                    .is_err()
                {
                    debug!(%peer_id, "send to a closing connection dropped");
                }
            }
        }
        NetworkCommand::Broadcast { channel, data } => {
            for node in active.values() {
                let _ = node
                    .command_tx
                    .send(NodeCommand::SendMessage {
                        channel,
                        data: data.clone(),
                    })
                    .await;
            }
        }
        NetworkCommand::Dial { address } => {
            peer_db.insert_address(address);
        }
        NetworkCommand::Ban { peer_id } => {
            warn!(%peer_id, "banning peer");
            peer_db.ban_peer(peer_id);
            if let Some(node) = active.get(&peer_id) {
                let _ = node
                    .command_tx
                    .send(NodeCommand::Close(ConnectionClosureReason::Banned))
                    .await;
            }
        }
        NetworkCommand::Close { peer_id } => {
            if let Some(node) = active.get(&peer_id) {
                let _ = node
                    .command_tx
                    .send(NodeCommand::Close(ConnectionClosureReason::Normal))
                    .await;
            }
        }
    }
}
