//! Serialization primitives shared by every corten crate.
//!
//! Wire-visible types implement the [`Serializer`] / [`Deserializer`] trait
//! pair through dedicated `XxxSerializer` / `XxxDeserializer` structs so that
//! bounds (ranges, maximum lengths) are carried by the codec object and not
//! by the data type itself.

#![warn(unused_crate_dependencies)]

use std::{
    collections::VecDeque,
    fmt::{Debug, Display},
};

use displaydoc::Display;
use nom::{
    error::{ContextError, ParseError},
    IResult,
};
use thiserror::Error;

pub mod proto;
pub mod rlp;

#[non_exhaustive]
#[derive(Display, Error, Debug, Clone)]
pub enum SerializeError {
    /// number {0} is too big to be serialized
    NumberTooBig(String),
    /// general error {0}
    GeneralError(String),
    /// string too big {0}
    StringTooBig(String),
}

/// Accumulating nom error used by all corten deserializers.
#[derive(Clone, Error)]
pub struct DeserializeError<'a> {
    errors: VecDeque<(&'a [u8], String)>,
}

impl<'a> ContextError<&'a [u8]> for DeserializeError<'a> {
    fn add_context(input: &'a [u8], ctx: &'static str, mut other: Self) -> Self {
        other.errors.push_front((input, ctx.to_string()));
        other
    }
}

impl<'a> ParseError<&'a [u8]> for DeserializeError<'a> {
    fn append(input: &'a [u8], kind: nom::error::ErrorKind, mut other: Self) -> Self {
        other
            .errors
            .push_front((input, kind.description().to_string()));
        other
    }
    fn from_error_kind(input: &'a [u8], kind: nom::error::ErrorKind) -> Self {
        let mut errors = VecDeque::new();
        errors.push_front((input, kind.description().to_string()));
        Self { errors }
    }
    fn from_char(input: &'a [u8], _: char) -> Self {
        Self::from_error_kind(input, nom::error::ErrorKind::Char)
    }
    fn or(self, other: Self) -> Self {
        other
    }
}

impl<'a> Display for DeserializeError<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for error in &self.errors {
            write!(f, "{} / ", error.1)?;
        }
        Ok(())
    }
}

impl<'a> Debug for DeserializeError<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut last_input = None;
        for error in &self.errors {
            write!(f, "{} / ", error.1)?;
            last_input = Some(error.0);
        }
        if let Some(last_input) = last_input {
            writeln!(f, "Input: {:?}", last_input)?;
        }
        Ok(())
    }
}

/// Serializes a value of type `T` into a growing byte buffer.
pub trait Serializer<T> {
    /// Serialize `value`, appending the produced bytes to `buffer`.
    fn serialize(&self, value: &T, buffer: &mut Vec<u8>) -> Result<(), SerializeError>;

    /// Serialize `value` into a fresh buffer.
    fn serialize_to_vec(&self, value: &T) -> Result<Vec<u8>, SerializeError> {
        let mut buffer = Vec::new();
        self.serialize(value, &mut buffer)?;
        Ok(buffer)
    }
}

/// Deserializes a value of type `T` from a byte slice.
pub trait Deserializer<T> {
    /// Deserialize a value from `buffer`, returning the unparsed rest and the
    /// decoded value.
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], T, E>;
}

macro_rules! gen_varint {
    ($($type:ident, $s:ident, $bs:ident, $ds:ident, $d:expr);*) => {
        use std::ops::{Bound, RangeBounds};
        use nom::error::context;
        use unsigned_varint::nom as unsigned_nom;
        $(
            use unsigned_varint::encode::{$type, $bs};
            #[doc = " Serializer for "]
            #[doc = $d]
            #[doc = " in varint form."]
            #[derive(Clone)]
            pub struct $s;

            impl $s {
                #[doc = "Create a serializer for "]
                #[doc = $d]
                #[doc = " in varint form."]
                #[allow(dead_code)]
                pub const fn new() -> Self {
                    Self
                }
            }

            impl Default for $s {
                fn default() -> $s {
                    $s::new()
                }
            }

            impl Serializer<$type> for $s {
                fn serialize(&self, value: &$type, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
                    buffer.extend_from_slice($type(*value, &mut $bs()));
                    Ok(())
                }
            }

            #[doc = " Deserializer for "]
            #[doc = $d]
            #[doc = " in varint form."]
            #[derive(Clone)]
            pub struct $ds {
                range: (Bound<$type>, Bound<$type>)
            }

            impl $ds {
                #[doc = "Create a range-checked deserializer for "]
                #[doc = $d]
                #[doc = " in varint form."]
                #[allow(dead_code)]
                pub const fn new(min: Bound<$type>, max: Bound<$type>) -> Self {
                    Self {
                        range: (min, max)
                    }
                }
            }

            impl Deserializer<$type> for $ds {
                fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(&self, buffer: &'a [u8]) -> IResult<&'a [u8], $type, E> {
                    context(concat!("Failed ", stringify!($type), " deserialization"), |input: &'a [u8]| {
                        let (rest, value) = unsigned_nom::$type(input).map_err(|_| nom::Err::Error(ParseError::from_error_kind(input, nom::error::ErrorKind::Fail)))?;
                        if !self.range.contains(&value) {
                            return Err(nom::Err::Error(ParseError::from_error_kind(input, nom::error::ErrorKind::Fail)));
                        }
                        Ok((rest, value))
                    })(buffer)
                }
            }
        )*
    };
}

gen_varint! {
    u16, U16VarIntSerializer, u16_buffer, U16VarIntDeserializer, "`u16`";
    u32, U32VarIntSerializer, u32_buffer, U32VarIntDeserializer, "`u32`";
    u64, U64VarIntSerializer, u64_buffer, U64VarIntDeserializer, "`u64`"
}

/// Serializer for `i64` values stored as two's-complement varints; used
/// where a signed field (round numbers, priorities) crosses the wire inside
/// an unsigned varint slot.
#[derive(Clone, Default)]
pub struct I64VarIntSerializer;

impl I64VarIntSerializer {
    /// Create a serializer for `i64` values.
    pub const fn new() -> Self {
        Self
    }
}

impl Serializer<i64> for I64VarIntSerializer {
    fn serialize(&self, value: &i64, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        U64VarIntSerializer::new().serialize(&(*value as u64), buffer)
    }
}

/// Deserializer counterpart of [`I64VarIntSerializer`].
#[derive(Clone)]
pub struct I64VarIntDeserializer {
    inner: U64VarIntDeserializer,
}

impl I64VarIntDeserializer {
    /// Create a deserializer for `i64` values.
    pub const fn new() -> Self {
        Self {
            inner: U64VarIntDeserializer::new(Bound::Unbounded, Bound::Unbounded),
        }
    }
}

impl Default for I64VarIntDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<i64> for I64VarIntDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], i64, E> {
        let (rest, raw) = self.inner.deserialize(buffer)?;
        Ok((rest, raw as i64))
    }
}

/// Serializer for raw byte vectors written as varint length followed by the
/// bytes.
#[derive(Clone, Default)]
pub struct VecU8Serializer {
    len_serializer: U64VarIntSerializer,
}

impl VecU8Serializer {
    /// Create a length-prefixed byte vector serializer.
    pub const fn new() -> Self {
        Self {
            len_serializer: U64VarIntSerializer::new(),
        }
    }
}

impl Serializer<Vec<u8>> for VecU8Serializer {
    fn serialize(&self, value: &Vec<u8>, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.len_serializer
            .serialize(&(value.len() as u64), buffer)?;
        buffer.extend_from_slice(value);
        Ok(())
    }
}

/// Deserializer counterpart of [`VecU8Serializer`], bounded by a maximum
/// length.
#[derive(Clone)]
pub struct VecU8Deserializer {
    len_deserializer: U64VarIntDeserializer,
}

impl VecU8Deserializer {
    /// Create a length-prefixed byte vector deserializer accepting at most
    /// `max_len` bytes.
    pub const fn new(max_len: u64) -> Self {
        Self {
            len_deserializer: U64VarIntDeserializer::new(
                Bound::Included(0),
                Bound::Included(max_len),
            ),
        }
    }
}

impl Deserializer<Vec<u8>> for VecU8Deserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Vec<u8>, E> {
        context("Failed Vec<u8> deserialization", |input: &'a [u8]| {
            let (rest, len) = self.len_deserializer.deserialize(input)?;
            let len = len as usize;
            if rest.len() < len {
                return Err(nom::Err::Error(ParseError::from_error_kind(
                    input,
                    nom::error::ErrorKind::Eof,
                )));
            }
            Ok((&rest[len..], rest[..len].to_vec()))
        })(buffer)
    }
}

/// Number of bytes needed to hold any value below `max_value` in big-endian
/// form with leading zero bytes stripped.
pub fn u32_be_bytes_min_length(max_value: u32) -> usize {
    4 - (max_value.leading_zeros() as usize) / 8
}

/// Big-endian encoding of `value` truncated to the minimal width able to hold
/// `max_value`. Used for socket-level length prefixes.
pub fn to_be_bytes_min(value: u32, max_value: u32) -> Result<Vec<u8>, SerializeError> {
    if value > max_value {
        return Err(SerializeError::NumberTooBig(format!(
            "value {} above maximum {}",
            value, max_value
        )));
    }
    let skip = 4 - u32_be_bytes_min_length(max_value);
    Ok(value.to_be_bytes()[skip..].to_vec())
}

/// Decode a big-endian integer previously written with [`to_be_bytes_min`].
pub fn from_be_bytes_min(buffer: &[u8], max_value: u32) -> Result<(u32, usize), SerializeError> {
    let read = u32_be_bytes_min_length(max_value);
    if buffer.len() < read {
        return Err(SerializeError::GeneralError("buffer too short".into()));
    }
    let mut value = 0u32;
    for byte in &buffer[..read] {
        value = (value << 8) | (*byte as u32);
    }
    if value > max_value {
        return Err(SerializeError::NumberTooBig(format!(
            "decoded value {} above maximum {}",
            value, max_value
        )));
    }
    Ok((value, read))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nom::error::VerboseError;

    #[test]
    fn varint_u64_roundtrip() {
        let ser = U64VarIntSerializer::new();
        let deser = U64VarIntDeserializer::new(Bound::Included(0), Bound::Included(u64::MAX));
        for value in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            let mut buffer = Vec::new();
            ser.serialize(&value, &mut buffer).unwrap();
            let (rest, decoded) = deser
                .deserialize::<VerboseError<&[u8]>>(&buffer)
                .expect("deserialization should succeed");
            assert!(rest.is_empty());
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn varint_range_rejected() {
        let ser = U32VarIntSerializer::new();
        let deser = U32VarIntDeserializer::new(Bound::Included(0), Bound::Excluded(100));
        let mut buffer = Vec::new();
        ser.serialize(&100u32, &mut buffer).unwrap();
        assert!(deser.deserialize::<VerboseError<&[u8]>>(&buffer).is_err());
    }

    #[test]
    fn vec_u8_roundtrip() {
        let ser = VecU8Serializer::new();
        let deser = VecU8Deserializer::new(1024);
        let data = vec![1u8, 2, 3, 250];
        let mut buffer = Vec::new();
        ser.serialize(&data, &mut buffer).unwrap();
        let (rest, decoded) = deser.deserialize::<VerboseError<&[u8]>>(&buffer).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, data);
    }

    #[test]
    fn min_be_int_roundtrip() {
        let max = 1_048_576u32;
        assert_eq!(u32_be_bytes_min_length(max), 3);
        let encoded = to_be_bytes_min(70_000, max).unwrap();
        assert_eq!(encoded.len(), 3);
        let (decoded, read) = from_be_bytes_min(&encoded, max).unwrap();
        assert_eq!(read, 3);
        assert_eq!(decoded, 70_000);
        assert!(to_be_bytes_min(max + 1, max).is_err());
    }
}
