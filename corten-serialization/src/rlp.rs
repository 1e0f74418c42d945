//! Recursive length prefix (RLP) codec.
//!
//! Application payloads use the Ethereum RLP canonical form: single bytes
//! below 0x80 encode themselves, short strings get a `0x80 + len` prefix,
//! long strings a `0xb7 + len_of_len` prefix, lists the same shape shifted to
//! `0xc0`/`0xf7`. Unsigned integers are big-endian with leading zeroes
//! stripped, so zero is the empty string `0x80`.

use displaydoc::Display;
use thiserror::Error;

#[non_exhaustive]
#[derive(Display, Error, Debug, Clone, PartialEq, Eq)]
pub enum RlpError {
    /// input exhausted while decoding
    UnexpectedEof,
    /// non-canonical encoding: {0}
    NonCanonical(String),
    /// trailing bytes after decoded item
    TrailingBytes,
    /// length prefix overflows usize
    LengthOverflow,
}

/// A decoded RLP item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RlpItem {
    Bytes(Vec<u8>),
    List(Vec<RlpItem>),
}

fn encode_length(len: usize, offset: u8, buffer: &mut Vec<u8>) {
    if len < 56 {
        buffer.push(offset + len as u8);
    } else {
        let be = len.to_be_bytes();
        let stripped: Vec<u8> = be.iter().copied().skip_while(|b| *b == 0).collect();
        buffer.push(offset + 55 + stripped.len() as u8);
        buffer.extend_from_slice(&stripped);
    }
}

/// Encode a byte string.
pub fn encode_bytes(value: &[u8], buffer: &mut Vec<u8>) {
    if value.len() == 1 && value[0] < 0x80 {
        buffer.push(value[0]);
    } else {
        encode_length(value.len(), 0x80, buffer);
        buffer.extend_from_slice(value);
    }
}

/// Encode an unsigned integer as its minimal big-endian byte string.
pub fn encode_uint(value: u64, buffer: &mut Vec<u8>) {
    let be = value.to_be_bytes();
    let stripped: Vec<u8> = be.iter().copied().skip_while(|b| *b == 0).collect();
    encode_bytes(&stripped, buffer);
}

/// Encode a list given the already-encoded concatenation of its items.
pub fn encode_list_payload(payload: &[u8], buffer: &mut Vec<u8>) {
    encode_length(payload.len(), 0xc0, buffer);
    buffer.extend_from_slice(payload);
}

/// Encode one item recursively.
pub fn encode_item(item: &RlpItem, buffer: &mut Vec<u8>) {
    match item {
        RlpItem::Bytes(bytes) => encode_bytes(bytes, buffer),
        RlpItem::List(items) => {
            let mut payload = Vec::new();
            for inner in items {
                encode_item(inner, &mut payload);
            }
            encode_list_payload(&payload, buffer);
        }
    }
}

fn decode_length(input: &[u8], len_of_len: usize) -> Result<(usize, &[u8]), RlpError> {
    if input.len() < len_of_len {
        return Err(RlpError::UnexpectedEof);
    }
    if len_of_len == 0 || input[0] == 0 {
        return Err(RlpError::NonCanonical("leading zero in length".into()));
    }
    if len_of_len > std::mem::size_of::<usize>() {
        return Err(RlpError::LengthOverflow);
    }
    let mut len = 0usize;
    for byte in &input[..len_of_len] {
        len = (len << 8) | *byte as usize;
    }
    if len < 56 {
        return Err(RlpError::NonCanonical("long form for short payload".into()));
    }
    Ok((len, &input[len_of_len..]))
}

/// Decode one item, returning it and the unconsumed rest.
pub fn decode_item(input: &[u8]) -> Result<(RlpItem, &[u8]), RlpError> {
    let first = *input.first().ok_or(RlpError::UnexpectedEof)?;
    match first {
        0x00..=0x7f => Ok((RlpItem::Bytes(vec![first]), &input[1..])),
        0x80..=0xb7 => {
            let len = (first - 0x80) as usize;
            let rest = &input[1..];
            if rest.len() < len {
                return Err(RlpError::UnexpectedEof);
            }
            if len == 1 && rest[0] < 0x80 {
                return Err(RlpError::NonCanonical("single byte below 0x80".into()));
            }
            Ok((RlpItem::Bytes(rest[..len].to_vec()), &rest[len..]))
        }
        0xb8..=0xbf => {
            let (len, rest) = decode_length(&input[1..], (first - 0xb7) as usize)?;
            if rest.len() < len {
                return Err(RlpError::UnexpectedEof);
            }
            Ok((RlpItem::Bytes(rest[..len].to_vec()), &rest[len..]))
        }
        0xc0..=0xf7 => {
            let len = (first - 0xc0) as usize;
            let rest = &input[1..];
            if rest.len() < len {
                return Err(RlpError::UnexpectedEof);
            }
            let items = decode_list_payload(&rest[..len])?;
            Ok((RlpItem::List(items), &rest[len..]))
        }
        0xf8..=0xff => {
            let (len, rest) = decode_length(&input[1..], (first - 0xf7) as usize)?;
            if rest.len() < len {
                return Err(RlpError::UnexpectedEof);
            }
            let items = decode_list_payload(&rest[..len])?;
            Ok((RlpItem::List(items), &rest[len..]))
        }
    }
}

fn decode_list_payload(mut payload: &[u8]) -> Result<Vec<RlpItem>, RlpError> {
    let mut items = Vec::new();
    while !payload.is_empty() {
        let (item, rest) = decode_item(payload)?;
        items.push(item);
        payload = rest;
    }
    Ok(items)
}

/// Decode exactly one item, rejecting trailing bytes.
pub fn decode(input: &[u8]) -> Result<RlpItem, RlpError> {
    let (item, rest) = decode_item(input)?;
    if !rest.is_empty() {
        return Err(RlpError::TrailingBytes);
    }
    Ok(item)
}

/// Decode an unsigned integer from a decoded byte item.
pub fn uint_from_item(item: &RlpItem) -> Result<u64, RlpError> {
    match item {
        RlpItem::Bytes(bytes) => {
            if bytes.len() > 8 {
                return Err(RlpError::LengthOverflow);
            }
            if bytes.first() == Some(&0) {
                return Err(RlpError::NonCanonical("leading zero in uint".into()));
            }
            let mut value = 0u64;
            for byte in bytes {
                value = (value << 8) | *byte as u64;
            }
            Ok(value)
        }
        RlpItem::List(_) => Err(RlpError::NonCanonical("expected bytes, got list".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uint_edges() {
        let mut buffer = Vec::new();
        encode_uint(0, &mut buffer);
        assert_eq!(buffer, vec![0x80]);
        assert_eq!(uint_from_item(&decode(&buffer).unwrap()).unwrap(), 0);

        buffer.clear();
        encode_uint(1024, &mut buffer);
        assert_eq!(buffer, vec![0x82, 0x04, 0x00]);
        assert_eq!(uint_from_item(&decode(&buffer).unwrap()).unwrap(), 1024);

        buffer.clear();
        encode_uint(127, &mut buffer);
        assert_eq!(buffer, vec![0x7f]);
    }

    #[test]
    fn empty_list() {
        let mut buffer = Vec::new();
        encode_item(&RlpItem::List(vec![]), &mut buffer);
        assert_eq!(buffer, vec![0xc0]);
        assert_eq!(decode(&buffer).unwrap(), RlpItem::List(vec![]));
    }

    #[test]
    fn nested_roundtrip() {
        let item = RlpItem::List(vec![
            RlpItem::Bytes(b"cat".to_vec()),
            RlpItem::List(vec![RlpItem::Bytes(b"dog".to_vec())]),
            RlpItem::Bytes(vec![]),
        ]);
        let mut buffer = Vec::new();
        encode_item(&item, &mut buffer);
        assert_eq!(decode(&buffer).unwrap(), item);
    }

    #[test]
    fn long_string_roundtrip() {
        let data = vec![0xabu8; 300];
        let mut buffer = Vec::new();
        encode_bytes(&data, &mut buffer);
        assert_eq!(buffer[0], 0xb9);
        assert_eq!(&buffer[1..3], &[0x01, 0x2c]);
        match decode(&buffer).unwrap() {
            RlpItem::Bytes(decoded) => assert_eq!(decoded, data),
            _ => panic!("expected bytes"),
        }
    }

    #[test]
    fn non_canonical_rejected() {
        // 0x81 0x05 re-encodes a single low byte
        assert!(decode(&[0x81, 0x05]).is_err());
        // trailing garbage
        assert!(decode(&[0x80, 0x00]).is_err());
    }
}
