//! The packet envelope above the record layer: a ULEB128-length-prefixed
//! protobuf `Packet` holding exactly one of ping, pong, or a channel
//! message. Logical messages are reassembled by concatenating same-channel
//! payloads up to and including `eof = true`.

use corten_network_exports::{ChannelId, NetworkError, NetworkResult};
use corten_serialization::proto;
use corten_serialization::DeserializeError;

const FIELD_PING: u32 = 1;
const FIELD_PONG: u32 = 2;
const FIELD_MSG: u32 = 3;

const MSG_FIELD_CHANNEL: u32 = 1;
const MSG_FIELD_EOF: u32 = 2;
const MSG_FIELD_DATA: u32 = 3;

/// One wire packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Keepalive request.
    Ping,
    /// Keepalive response.
    Pong,
    /// A fragment of a logical message on one channel.
    Msg {
        /// Gossip channel.
        channel: ChannelId,
        /// Last fragment marker.
        eof: bool,
        /// Fragment payload.
        data: Vec<u8>,
    },
}

impl Packet {
    /// Encode with the ULEB128 length prefix.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::new();
        match self {
            Packet::Ping => proto::write_message_field(FIELD_PING, &[], &mut body),
            Packet::Pong => proto::write_message_field(FIELD_PONG, &[], &mut body),
            Packet::Msg { channel, eof, data } => {
                let mut msg = Vec::with_capacity(data.len() + 8);
                proto::write_varint_field(MSG_FIELD_CHANNEL, u8::from(*channel) as u64, &mut msg);
                proto::write_varint_field(MSG_FIELD_EOF, *eof as u64, &mut msg);
                proto::write_bytes_field(MSG_FIELD_DATA, data, &mut msg);
                proto::write_message_field(FIELD_MSG, &msg, &mut body);
            }
        }
        let mut framed = Vec::with_capacity(body.len() + 4);
        proto::write_uvarint(body.len() as u64, &mut framed);
        framed.extend_from_slice(&body);
        framed
    }

    /// Try decoding one length-prefixed packet from the front of `buffer`.
    /// Returns the packet and the bytes consumed, or `None` when more bytes
    /// are needed.
    pub fn from_prefixed_bytes(buffer: &[u8]) -> NetworkResult<Option<(Packet, usize)>> {
        let (after_len, body_len) = match proto::read_uvarint::<DeserializeError>(buffer) {
            Ok(done) => done,
            Err(_) => return Ok(None),
        };
        let body_len = body_len as usize;
        if after_len.len() < body_len {
            return Ok(None);
        }
        let consumed = buffer.len() - after_len.len() + body_len;
        let packet = Packet::from_body(&after_len[..body_len])?;
        Ok(Some((packet, consumed)))
    }

    fn from_body(body: &[u8]) -> NetworkResult<Packet> {
        let (rest, (field, wire)) = proto::read_key::<DeserializeError>(body)
            .map_err(|_| NetworkError::BadPacket("missing oneof key".into()))?;
        if wire != proto::WIRE_LEN {
            return Err(NetworkError::BadPacket("oneof must be a message".into()));
        }
        let (trailing, payload) = proto::read_len_delimited::<DeserializeError>(rest)
            .map_err(|_| NetworkError::BadPacket("truncated oneof".into()))?;
        if !trailing.is_empty() {
            return Err(NetworkError::BadPacket("trailing bytes in packet".into()));
        }
        match field {
            FIELD_PING => Ok(Packet::Ping),
            FIELD_PONG => Ok(Packet::Pong),
            FIELD_MSG => Packet::msg_from_body(payload),
            other => Err(NetworkError::BadPacket(format!(
                "unknown packet field {}",
                other
            ))),
        }
    }

    fn msg_from_body(mut body: &[u8]) -> NetworkResult<Packet> {
        let mut channel: Option<ChannelId> = None;
        let mut eof = false;
        let mut data = Vec::new();
        while !body.is_empty() {
            let (rest, (field, wire)) = proto::read_key::<DeserializeError>(body)
                .map_err(|_| NetworkError::BadPacket("bad msg field key".into()))?;
            body = match (field, wire) {
                (MSG_FIELD_CHANNEL, proto::WIRE_VARINT) => {
                    let (rest, value) = proto::read_uvarint::<DeserializeError>(rest)
                        .map_err(|_| NetworkError::BadPacket("bad channel".into()))?;
                    let raw: u8 = value
                        .try_into()
                        .map_err(|_| NetworkError::BadPacket("channel out of range".into()))?;
                    channel = Some(ChannelId::try_from(raw).map_err(|_| {
                        NetworkError::BadPacket(format!("unknown channel {:#04x}", raw))
                    })?);
                    rest
                }
                (MSG_FIELD_EOF, proto::WIRE_VARINT) => {
                    let (rest, value) = proto::read_uvarint::<DeserializeError>(rest)
                        .map_err(|_| NetworkError::BadPacket("bad eof".into()))?;
                    eof = value != 0;
                    rest
                }
                (MSG_FIELD_DATA, proto::WIRE_LEN) => {
                    let (rest, payload) = proto::read_len_delimited::<DeserializeError>(rest)
                        .map_err(|_| NetworkError::BadPacket("bad data".into()))?;
                    data = payload.to_vec();
                    rest
                }
                (_, wire) => {
                    let (rest, ()) = proto::skip_field::<DeserializeError>(rest, wire)
                        .map_err(|_| NetworkError::BadPacket("bad unknown field".into()))?;
                    rest
                }
            };
        }
        // channel 0 (PeerError) encodes as an absent varint field
        let channel = channel.unwrap_or(ChannelId::PeerError);
        Ok(Packet::Msg { channel, eof, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_pong_roundtrip() {
        for packet in [Packet::Ping, Packet::Pong] {
            let bytes = packet.to_bytes();
            let (decoded, consumed) = Packet::from_prefixed_bytes(&bytes).unwrap().unwrap();
            assert_eq!(consumed, bytes.len());
            assert_eq!(decoded, packet);
        }
    }

    #[test]
    fn msg_roundtrip() {
        let packet = Packet::Msg {
            channel: ChannelId::Vote,
            eof: true,
            data: vec![1, 2, 3, 4],
        };
        let bytes = packet.to_bytes();
        let (decoded, consumed) = Packet::from_prefixed_bytes(&bytes).unwrap().unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, packet);
    }

    #[test]
    fn partial_input_asks_for_more() {
        let packet = Packet::Msg {
            channel: ChannelId::Data,
            eof: false,
            data: vec![9; 100],
        };
        let bytes = packet.to_bytes();
        assert!(Packet::from_prefixed_bytes(&bytes[..bytes.len() - 1])
            .unwrap()
            .is_none());
    }

    #[test]
    fn unknown_channel_rejected() {
        // hand-build a packet with channel 0x55
        let mut msg = Vec::new();
        proto::write_varint_field(MSG_FIELD_CHANNEL, 0x55, &mut msg);
        let mut body = Vec::new();
        proto::write_message_field(FIELD_MSG, &msg, &mut body);
        let mut framed = Vec::new();
        proto::write_uvarint(body.len() as u64, &mut framed);
        framed.extend_from_slice(&body);
        assert!(Packet::from_prefixed_bytes(&framed).is_err());
    }
}
