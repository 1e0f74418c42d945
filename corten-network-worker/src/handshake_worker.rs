//! Deadline-bounded handshake execution.

use crate::binders::{ReadBinder, WriteBinder};
use crate::secret_connection::handshake;
use corten_network_exports::{NetworkConfig, NetworkError, NetworkResult, PeerId};
use corten_signature::KeyPair;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::time::timeout;

/// Run the station-to-station handshake on a fresh stream under the
/// configured deadline, returning binders ready for packet traffic.
pub async fn perform_handshake<S: AsyncRead + AsyncWrite + Unpin>(
    config: &NetworkConfig,
    local_key: &KeyPair,
    stream: S,
) -> NetworkResult<(PeerId, ReadBinder<ReadHalf<S>>, WriteBinder<WriteHalf<S>>)> {
    let (reader, writer, peer_id) = timeout(
        config.handshake_timeout.to_duration(),
        handshake(stream, local_key),
    )
    .await
    .map_err(|_| NetworkError::Timeout("handshake".into()))??;
    Ok((
        peer_id,
        ReadBinder::new(reader, config.max_message_size as usize),
        WriteBinder::new(writer),
    ))
}
