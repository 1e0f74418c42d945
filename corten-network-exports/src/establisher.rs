//! TCP connection establishment, isolated so workers stay testable over
//! in-memory streams (the record layer and binders are generic over the
//! stream type).

use corten_time::Timestamp;
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

/// Accepts inbound connections.
#[derive(Debug)]
pub struct Listener(TcpListener);

impl Listener {
    /// Accept one connection.
    pub async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, address) = self.0.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, address))
    }

    /// The bound local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.0.local_addr()
    }
}

/// Dials outbound connections with a timeout.
#[derive(Debug)]
pub struct Connector(Timestamp);

impl Connector {
    /// Dial `address`.
    pub async fn connect(&mut self, address: SocketAddr) -> io::Result<TcpStream> {
        match timeout(self.0.to_duration(), TcpStream::connect(address)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            Ok(Err(e)) => Err(e),
            Err(elapsed) => Err(io::Error::new(io::ErrorKind::TimedOut, elapsed)),
        }
    }
}

/// Builds listeners and connectors.
#[derive(Debug, Default)]
pub struct Establisher;

impl Establisher {
    /// Create an establisher.
    pub fn new() -> Self {
        Establisher
    }

    /// Bind a listener.
    pub async fn get_listener(&mut self, address: SocketAddr) -> io::Result<Listener> {
        Ok(Listener(TcpListener::bind(address).await?))
    }

    /// Create a connector with the given dial timeout.
    pub async fn get_connector(&mut self, dial_timeout: Timestamp) -> io::Result<Connector> {
        Ok(Connector(dial_timeout))
    }
}
