//! Protobuf wire-format primitives.
//!
//! Canonical signing payloads and the peer wire protocol must be bit-exact
//! with their protobuf definitions, so the field encoders here write the raw
//! wire format directly: a key varint `(field_number << 3) | wire_type`
//! followed by a varint, little-endian fixed64, or length-delimited payload.
//! Encoders follow proto3 presence rules: scalar fields equal to their zero
//! value are omitted unless written through one of the `*_always` variants.

use nom::error::{context, ContextError, ParseError};
use nom::IResult;

/// Varint wire type.
pub const WIRE_VARINT: u8 = 0;
/// 64-bit little-endian wire type.
pub const WIRE_FIXED64: u8 = 1;
/// Length-delimited wire type.
pub const WIRE_LEN: u8 = 2;

/// Append a base-128 varint.
pub fn write_uvarint(mut value: u64, buffer: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buffer.push(byte);
            return;
        }
        buffer.push(byte | 0x80);
    }
}

/// Append a field key.
pub fn write_key(field: u32, wire_type: u8, buffer: &mut Vec<u8>) {
    write_uvarint(((field as u64) << 3) | wire_type as u64, buffer);
}

/// Append a varint field, omitted when zero.
pub fn write_varint_field(field: u32, value: u64, buffer: &mut Vec<u8>) {
    if value == 0 {
        return;
    }
    write_key(field, WIRE_VARINT, buffer);
    write_uvarint(value, buffer);
}

/// Append a signed fixed64 field (little-endian), omitted when zero.
pub fn write_sfixed64_field(field: u32, value: i64, buffer: &mut Vec<u8>) {
    if value == 0 {
        return;
    }
    write_key(field, WIRE_FIXED64, buffer);
    buffer.extend_from_slice(&value.to_le_bytes());
}

/// Append a bytes/string field, omitted when empty.
pub fn write_bytes_field(field: u32, value: &[u8], buffer: &mut Vec<u8>) {
    if value.is_empty() {
        return;
    }
    write_key(field, WIRE_LEN, buffer);
    write_uvarint(value.len() as u64, buffer);
    buffer.extend_from_slice(value);
}

/// Append an embedded message field. Written even when the body is empty:
/// message presence is meaningful in proto3.
pub fn write_message_field(field: u32, body: &[u8], buffer: &mut Vec<u8>) {
    write_key(field, WIRE_LEN, buffer);
    write_uvarint(body.len() as u64, buffer);
    buffer.extend_from_slice(body);
}

/// Append a `google.protobuf.Timestamp` message field.
pub fn write_timestamp_field(field: u32, seconds: i64, nanos: i32, buffer: &mut Vec<u8>) {
    let mut body = Vec::with_capacity(12);
    write_varint_field(1, seconds as u64, &mut body);
    write_varint_field(2, nanos as u64, &mut body);
    write_message_field(field, &body, buffer);
}

/// Read a base-128 varint.
pub fn read_uvarint<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
    input: &'a [u8],
) -> IResult<&'a [u8], u64, E> {
    context("Failed uvarint deserialization", |input: &'a [u8]| {
        let mut value = 0u64;
        let mut shift = 0u32;
        for (idx, byte) in input.iter().enumerate() {
            if shift >= 64 {
                return Err(nom::Err::Error(ParseError::from_error_kind(
                    input,
                    nom::error::ErrorKind::TooLarge,
                )));
            }
            value |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok((&input[idx + 1..], value));
            }
            shift += 7;
        }
        Err(nom::Err::Error(ParseError::from_error_kind(
            input,
            nom::error::ErrorKind::Eof,
        )))
    })(input)
}

/// Read a field key, returning `(field_number, wire_type)`.
pub fn read_key<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
    input: &'a [u8],
) -> IResult<&'a [u8], (u32, u8), E> {
    let (rest, key) = read_uvarint(input)?;
    Ok((rest, ((key >> 3) as u32, (key & 0x7) as u8)))
}

/// Read a length-delimited payload.
pub fn read_len_delimited<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
    input: &'a [u8],
) -> IResult<&'a [u8], &'a [u8], E> {
    let (rest, len) = read_uvarint(input)?;
    let len = len as usize;
    if rest.len() < len {
        return Err(nom::Err::Error(ParseError::from_error_kind(
            input,
            nom::error::ErrorKind::Eof,
        )));
    }
    Ok((&rest[len..], &rest[..len]))
}

/// Read a little-endian sfixed64.
pub fn read_sfixed64<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
    input: &'a [u8],
) -> IResult<&'a [u8], i64, E> {
    if input.len() < 8 {
        return Err(nom::Err::Error(ParseError::from_error_kind(
            input,
            nom::error::ErrorKind::Eof,
        )));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&input[..8]);
    Ok((&input[8..], i64::from_le_bytes(bytes)))
}

/// Skip one field of the given wire type. Unknown fields are tolerated on
/// decode so that adding fields stays forward-compatible.
pub fn skip_field<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
    input: &'a [u8],
    wire_type: u8,
) -> IResult<&'a [u8], (), E> {
    match wire_type {
        WIRE_VARINT => read_uvarint(input).map(|(rest, _)| (rest, ())),
        WIRE_FIXED64 => read_sfixed64(input).map(|(rest, _)| (rest, ())),
        WIRE_LEN => read_len_delimited(input).map(|(rest, _)| (rest, ())),
        _ => Err(nom::Err::Error(ParseError::from_error_kind(
            input,
            nom::error::ErrorKind::Tag,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nom::error::VerboseError;

    #[test]
    fn uvarint_wire_form() {
        let mut buffer = Vec::new();
        write_uvarint(300, &mut buffer);
        assert_eq!(buffer, vec![0xac, 0x02]);
        let (rest, value) = read_uvarint::<VerboseError<&[u8]>>(&buffer).unwrap();
        assert!(rest.is_empty());
        assert_eq!(value, 300);
    }

    #[test]
    fn zero_scalar_fields_omitted() {
        let mut buffer = Vec::new();
        write_varint_field(1, 0, &mut buffer);
        write_sfixed64_field(2, 0, &mut buffer);
        write_bytes_field(3, b"", &mut buffer);
        assert!(buffer.is_empty());
    }

    #[test]
    fn sfixed64_little_endian() {
        let mut buffer = Vec::new();
        write_sfixed64_field(2, 5, &mut buffer);
        assert_eq!(buffer, vec![0x11, 5, 0, 0, 0, 0, 0, 0, 0]);
        let (_, (field, wire)) = read_key::<VerboseError<&[u8]>>(&buffer).unwrap();
        assert_eq!((field, wire), (2, WIRE_FIXED64));
        let (rest, value) = read_sfixed64::<VerboseError<&[u8]>>(&buffer[1..]).unwrap();
        assert!(rest.is_empty());
        assert_eq!(value, 5);
    }

    #[test]
    fn timestamp_message_shape() {
        let mut buffer = Vec::new();
        write_timestamp_field(5, 10, 500, &mut buffer);
        // key(5, LEN), len, then seconds/nanos varint fields
        let (rest, (field, wire)) = read_key::<VerboseError<&[u8]>>(&buffer).unwrap();
        assert_eq!((field, wire), (5, WIRE_LEN));
        let (rest, body) = read_len_delimited::<VerboseError<&[u8]>>(rest).unwrap();
        assert!(rest.is_empty());
        assert_eq!(body, &[0x08, 10, 0x10, 0xf4, 0x03]);
    }
}
