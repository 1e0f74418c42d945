//! Positional bit array used for vote bookkeeping and part-set assembly.

use corten_serialization::{
    Deserializer, SerializeError, Serializer, U32VarIntDeserializer, U32VarIntSerializer,
};
use nom::{
    error::{context, ContextError, ParseError},
    IResult,
};
use rand::seq::SliceRandom;
use std::ops::Bound::Included;

/// Fixed-size array of bits.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BitArray {
    bits: usize,
    elems: Vec<u64>,
}

impl BitArray {
    /// Create an array of `bits` zeroed bits.
    pub fn new(bits: usize) -> Self {
        BitArray {
            bits,
            elems: vec![0u64; bits.div_ceil(64)],
        }
    }

    /// Number of bits.
    pub fn size(&self) -> usize {
        self.bits
    }

    /// Read one bit; out-of-range indexes read as false.
    pub fn get_index(&self, index: usize) -> bool {
        if index >= self.bits {
            return false;
        }
        self.elems[index / 64] & (1u64 << (index % 64)) != 0
    }

    /// Write one bit; out-of-range indexes are ignored.
    pub fn set_index(&mut self, index: usize, value: bool) {
        if index >= self.bits {
            return;
        }
        if value {
            self.elems[index / 64] |= 1u64 << (index % 64);
        } else {
            self.elems[index / 64] &= !(1u64 << (index % 64));
        }
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> usize {
        self.elems.iter().map(|e| e.count_ones() as usize).sum()
    }

    /// True when no bit is set.
    pub fn is_empty(&self) -> bool {
        self.elems.iter().all(|e| *e == 0)
    }

    /// Bitwise or with another array of the same size.
    pub fn update(&mut self, other: &BitArray) {
        for (elem, other_elem) in self.elems.iter_mut().zip(other.elems.iter()) {
            *elem |= other_elem;
        }
    }

    /// Bits set here but not in `other`.
    pub fn sub(&self, other: &BitArray) -> BitArray {
        let mut result = self.clone();
        for (elem, other_elem) in result.elems.iter_mut().zip(other.elems.iter()) {
            *elem &= !other_elem;
        }
        result
    }

    /// Complement within the array size.
    pub fn not(&self) -> BitArray {
        let mut result = BitArray::new(self.bits);
        for (idx, elem) in self.elems.iter().enumerate() {
            result.elems[idx] = !elem;
        }
        // mask the tail beyond `bits`
        let tail = self.bits % 64;
        if tail != 0 {
            if let Some(last) = result.elems.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }
        result
    }

    /// Pick a uniformly random set bit, if any.
    pub fn pick_random(&self) -> Option<usize> {
        let set: Vec<usize> = (0..self.bits).filter(|i| self.get_index(*i)).collect();
        set.choose(&mut rand::thread_rng()).copied()
    }

    /// Indexes of all set bits.
    pub fn ones(&self) -> Vec<usize> {
        (0..self.bits).filter(|i| self.get_index(*i)).collect()
    }
}

impl std::fmt::Display for BitArray {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for index in 0..self.bits {
            write!(f, "{}", if self.get_index(index) { 'x' } else { '_' })?;
        }
        Ok(())
    }
}

/// Serializer for [`BitArray`].
#[derive(Clone, Default)]
pub struct BitArraySerializer {
    u32_serializer: U32VarIntSerializer,
}

impl BitArraySerializer {
    /// Create a bit array serializer.
    pub const fn new() -> Self {
        Self {
            u32_serializer: U32VarIntSerializer::new(),
        }
    }
}

impl Serializer<BitArray> for BitArraySerializer {
    fn serialize(&self, value: &BitArray, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.u32_serializer
            .serialize(&(value.bits as u32), buffer)?;
        for elem in &value.elems {
            buffer.extend_from_slice(&elem.to_le_bytes());
        }
        Ok(())
    }
}

/// Deserializer for [`BitArray`], bounded by a maximum bit count.
#[derive(Clone)]
pub struct BitArrayDeserializer {
    bits_deserializer: U32VarIntDeserializer,
}

impl BitArrayDeserializer {
    /// Create a bit array deserializer accepting at most `max_bits` bits.
    pub const fn new(max_bits: u32) -> Self {
        Self {
            bits_deserializer: U32VarIntDeserializer::new(Included(0), Included(max_bits)),
        }
    }
}

impl Deserializer<BitArray> for BitArrayDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], BitArray, E> {
        context("Failed bit array deserialization", |input: &'a [u8]| {
            let (mut rest, bits) = self.bits_deserializer.deserialize(input)?;
            let bits = bits as usize;
            let mut elems = Vec::with_capacity(bits.div_ceil(64));
            for _ in 0..bits.div_ceil(64) {
                if rest.len() < 8 {
                    return Err(nom::Err::Error(ParseError::from_error_kind(
                        input,
                        nom::error::ErrorKind::Eof,
                    )));
                }
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&rest[..8]);
                elems.push(u64::from_le_bytes(bytes));
                rest = &rest[8..];
            }
            Ok((rest, BitArray { bits, elems }))
        })(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nom::error::VerboseError;

    #[test]
    fn set_get_count() {
        let mut array = BitArray::new(70);
        array.set_index(0, true);
        array.set_index(69, true);
        array.set_index(70, true); // out of range, ignored
        assert!(array.get_index(0));
        assert!(array.get_index(69));
        assert!(!array.get_index(70));
        assert_eq!(array.count_ones(), 2);
        array.set_index(0, false);
        assert_eq!(array.count_ones(), 1);
    }

    #[test]
    fn sub_and_not() {
        let mut a = BitArray::new(5);
        let mut b = BitArray::new(5);
        a.set_index(1, true);
        a.set_index(3, true);
        b.set_index(3, true);
        assert_eq!(a.sub(&b).ones(), vec![1]);
        assert_eq!(b.not().ones(), vec![0, 1, 2, 4]);
    }

    #[test]
    fn wire_roundtrip() {
        let mut array = BitArray::new(130);
        array.set_index(129, true);
        array.set_index(64, true);
        let mut buffer = Vec::new();
        BitArraySerializer::new()
            .serialize(&array, &mut buffer)
            .unwrap();
        let (rest, decoded) = BitArrayDeserializer::new(1024)
            .deserialize::<VerboseError<&[u8]>>(&buffer)
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, array);
    }
}
