//! Per-connection worker: one read loop, one writer task, keepalive, and
//! logical-message reassembly. One worker per handshaked peer.

use crate::binders::{ReadBinder, WriteBinder};
use crate::messages::Packet;
use corten_logging::corten_trace;
use corten_network_exports::{
    ChannelId, ConnectionClosureReason, NetworkConfig, NetworkError, NetworkResult, PeerId,
};
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, warn};

/// Commands to one connection.
#[derive(Debug)]
pub enum NodeCommand {
    /// Send a full logical message on a channel.
    SendMessage {
        /// Gossip channel.
        channel: ChannelId,
        /// Full message bytes.
        data: Vec<u8>,
    },
    /// Close the connection.
    Close(ConnectionClosureReason),
}

/// Events from one connection.
#[derive(Debug)]
pub enum NodeEventType {
    /// A complete logical message arrived.
    Received {
        /// Gossip channel.
        channel: ChannelId,
        /// Reassembled bytes.
        data: Vec<u8>,
    },
    /// The connection ended.
    Closed(ConnectionClosureReason),
}

/// An event tagged with its connection.
#[derive(Debug)]
pub struct NodeEvent {
    /// The peer the event belongs to.
    pub peer_id: PeerId,
    /// What happened.
    pub event: NodeEventType,
}

/// Drives one handshaked connection.
pub struct NodeWorker<R, W> {
    config: NetworkConfig,
    peer_id: PeerId,
    read_binder: ReadBinder<R>,
    write_binder: Option<WriteBinder<W>>,
    command_rx: mpsc::Receiver<NodeCommand>,
    event_tx: mpsc::Sender<NodeEvent>,
}

impl<R, W> NodeWorker<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Create a worker for a fresh connection.
    pub fn new(
        config: NetworkConfig,
        peer_id: PeerId,
        read_binder: ReadBinder<R>,
        write_binder: WriteBinder<W>,
        command_rx: mpsc::Receiver<NodeCommand>,
        event_tx: mpsc::Sender<NodeEvent>,
    ) -> Self {
        NodeWorker {
            config,
            peer_id,
            read_binder,
            write_binder: Some(write_binder),
            command_rx,
            event_tx,
        }
    }

    async fn emit(&self, event: NodeEventType) {
        let _ = self
            .event_tx
            .send(NodeEvent {
                peer_id: self.peer_id,
                event,
            })
            .await;
    }

    /// Run the connection until it closes, emitting the closure event.
    pub async fn run_loop(mut self) -> NetworkResult<ConnectionClosureReason> {
        let (writer_tx, mut writer_rx) =
            mpsc::channel::<Packet>(self.config.node_send_channel_size);
        let mut write_binder = self
            .write_binder
            .take()
            .ok_or_else(|| NetworkError::Channel("run_loop called twice".into()))?;
        let write_timeout = self.config.message_timeout;
        let peer_id = self.peer_id;
        let writer_handle = tokio::spawn(async move {
            // drains queued writes; ends when the sender side drops
            while let Some(packet) = writer_rx.recv().await {
                match timeout(write_timeout.to_duration(), write_binder.send(&packet)).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(err)) => {
                        debug!(%peer_id, "write failed: {}", err);
                        return Err(err);
                    }
                    Err(_) => {
                        debug!(%peer_id, "write timed out");
                        return Err(NetworkError::Timeout("write".into()));
                    }
                }
            }
            Ok(())
        });

        let mut assemblers: HashMap<ChannelId, Vec<u8>> = HashMap::new();
        let mut last_inbound = Instant::now();
        let mut keepalive = tokio::time::interval(self.config.keepalive_interval.to_duration());
        keepalive.reset();

        let reason = loop {
            let heartbeat_deadline = last_inbound + self.config.heartbeat_timeout.to_duration();
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    None | Some(NodeCommand::Close(_)) => {
                        let reason = match command {
                            Some(NodeCommand::Close(reason)) => reason,
                            None => ConnectionClosureReason::Normal,
                            Some(NodeCommand::SendMessage { .. }) => unreachable!(),
                        };
                        break reason;
                    }
                    Some(NodeCommand::SendMessage { channel, data }) => {
                        if self.queue_message(&writer_tx, channel, data).await.is_err() {
                            break ConnectionClosureReason::Failed;
                        }
                    }
                },
                received = self.read_binder.next() => match received {
                    Err(NetworkError::BadSeal) | Err(NetworkError::BadFrame(_)) => {
                        warn!(peer_id = %self.peer_id, "sealed channel violated");
                        break ConnectionClosureReason::Failed;
                    }
                    Err(err) => {
                        debug!(peer_id = %self.peer_id, "read ended: {}", err);
                        break ConnectionClosureReason::Normal;
                    }
                    Ok((_, packet)) => {
                        last_inbound = Instant::now();
                        match packet {
                            Packet::Ping => {
                                if writer_tx.send(Packet::Pong).await.is_err() {
                                    break ConnectionClosureReason::Failed;
                                }
                            }
                            Packet::Pong => {}
                            Packet::Msg { channel, eof, data } => {
                                match self.ingest(&mut assemblers, channel, eof, data) {
                                    Ok(Some(message)) => {
                                        self.emit(NodeEventType::Received {
                                            channel,
                                            data: message,
                                        })
                                        .await;
                                    }
                                    Ok(None) => {}
                                    Err(err) => {
                                        warn!(peer_id = %self.peer_id, "bad message: {}", err);
                                        break ConnectionClosureReason::Failed;
                                    }
                                }
                            }
                        }
                    }
                },
                _ = keepalive.tick() => {
                    corten_trace!("node_worker.keepalive", peer = %self.peer_id);
                    if writer_tx.send(Packet::Ping).await.is_err() {
                        break ConnectionClosureReason::Failed;
                    }
                }
                _ = sleep_until(heartbeat_deadline) => {
                    warn!(peer_id = %self.peer_id, "heartbeat timeout");
                    break ConnectionClosureReason::HeartbeatTimeout;
                }
            }
        };

        // dropping the queue sender lets the writer drain and stop
        drop(writer_tx);
        let _ = writer_handle.await;
        self.emit(NodeEventType::Closed(reason)).await;
        Ok(reason)
    }

    /// Fragment one logical message into channel packets.
    async fn queue_message(
        &self,
        writer_tx: &mpsc::Sender<Packet>,
        channel: ChannelId,
        data: Vec<u8>,
    ) -> NetworkResult<()> {
        if data.len() > self.config.max_message_size as usize {
            return Err(NetworkError::MessageTooBig(
                data.len(),
                self.config.max_message_size,
            ));
        }
        let chunk_size = self.config.max_packet_payload_size.max(1);
        let chunks: Vec<&[u8]> = if data.is_empty() {
            vec![&[]]
        } else {
            data.chunks(chunk_size).collect()
        };
        let last = chunks.len() - 1;
        for (index, chunk) in chunks.iter().enumerate() {
            writer_tx
                .send(Packet::Msg {
                    channel,
                    eof: index == last,
                    data: chunk.to_vec(),
                })
                .await
                .map_err(|_| NetworkError::Channel("writer queue closed".into()))?;
        }
        Ok(())
    }

    /// Feed one fragment into the per-channel assembler; a complete message
    /// comes back on `eof`.
    fn ingest(
        &self,
        assemblers: &mut HashMap<ChannelId, Vec<u8>>,
        channel: ChannelId,
        eof: bool,
        data: Vec<u8>,
    ) -> NetworkResult<Option<Vec<u8>>> {
        let buffer = assemblers.entry(channel).or_default();
        if buffer.len() + data.len() > self.config.max_message_size as usize {
            return Err(NetworkError::MessageTooBig(
                buffer.len() + data.len(),
                self.config.max_message_size,
            ));
        }
        buffer.extend_from_slice(&data);
        if !eof {
            return Ok(None);
        }
        Ok(Some(std::mem::take(buffer)))
    }
}
