//! Packet binders over the record layer: the write side frames packets into
//! sealed records, the read side re-buffers records into packets.

use crate::messages::Packet;
use crate::secret_connection::{SecretReader, SecretWriter};
use corten_network_exports::{NetworkError, NetworkResult};
use tokio::io::{AsyncRead, AsyncWrite};

/// Serializes and seals outbound packets.
pub struct WriteBinder<W> {
    writer: SecretWriter<W>,
    message_index: u64,
}

impl<W: AsyncWrite + Unpin> WriteBinder<W> {
    /// Wrap an encrypted writer.
    pub fn new(writer: SecretWriter<W>) -> Self {
        WriteBinder {
            writer,
            message_index: 0,
        }
    }

    /// Send one packet, returning its sequence index.
    pub async fn send(&mut self, packet: &Packet) -> NetworkResult<u64> {
        self.writer.write_chunk(&packet.to_bytes()).await?;
        let index = self.message_index;
        self.message_index += 1;
        Ok(index)
    }
}

/// Opens records and re-assembles inbound packets.
pub struct ReadBinder<R> {
    reader: SecretReader<R>,
    buffer: Vec<u8>,
    max_packet_size: usize,
    message_index: u64,
}

impl<R: AsyncRead + Unpin> ReadBinder<R> {
    /// Wrap an encrypted reader; `max_packet_size` bounds buffering for one
    /// packet.
    pub fn new(reader: SecretReader<R>, max_packet_size: usize) -> Self {
        ReadBinder {
            reader,
            buffer: Vec::new(),
            max_packet_size,
            message_index: 0,
        }
    }

    /// Await the next packet.
    pub async fn next(&mut self) -> NetworkResult<(u64, Packet)> {
        loop {
            if let Some((packet, consumed)) = Packet::from_prefixed_bytes(&self.buffer)? {
                self.buffer.drain(..consumed);
                let index = self.message_index;
                self.message_index += 1;
                return Ok((index, packet));
            }
            if self.buffer.len() > self.max_packet_size {
                return Err(NetworkError::MessageTooBig(
                    self.buffer.len(),
                    self.max_packet_size as u32,
                ));
            }
            let chunk = self.reader.read_frame().await?;
            self.buffer.extend_from_slice(&chunk);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret_connection::handshake;
    use corten_network_exports::ChannelId;
    use corten_signature::KeyPair;

    #[tokio::test]
    async fn packets_cross_the_sealed_channel() {
        let key_a = KeyPair::generate();
        let key_b = KeyPair::generate();
        let (stream_a, stream_b) = tokio::io::duplex(256 * 1024);
        let (side_a, side_b) =
            tokio::join!(handshake(stream_a, &key_a), handshake(stream_b, &key_b));
        let (_, writer_a, _) = side_a.unwrap();
        let (reader_b, _, _) = side_b.unwrap();

        let mut write_binder = WriteBinder::new(writer_a);
        let mut read_binder = ReadBinder::new(reader_b, 1 << 20);

        // a packet larger than one record must re-assemble transparently
        let big = Packet::Msg {
            channel: ChannelId::Data,
            eof: true,
            data: vec![3u8; 5_000],
        };
        assert_eq!(write_binder.send(&Packet::Ping).await.unwrap(), 0);
        assert_eq!(write_binder.send(&big).await.unwrap(), 1);

        let (index, packet) = read_binder.next().await.unwrap();
        assert_eq!((index, packet), (0, Packet::Ping));
        let (index, packet) = read_binder.next().await.unwrap();
        assert_eq!(index, 1);
        assert_eq!(packet, big);
    }
}
