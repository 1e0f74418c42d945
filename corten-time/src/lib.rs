//! Time representation shared by all corten crates: a millisecond-precision
//! UTC timestamp that doubles as a duration in configuration fields.

#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]

mod error;

pub use error::TimeError;

use corten_serialization::{
    Deserializer, SerializeError, Serializer, U64VarIntDeserializer, U64VarIntSerializer,
};
use nom::{
    error::{context, ContextError, ParseError},
    IResult,
};
use std::ops::Bound;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the UNIX epoch. Also used for relative durations in
/// configuration (timeouts, TTLs, ages).
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The epoch itself.
    pub const ZERO: Timestamp = Timestamp(0);

    /// Build from milliseconds.
    pub const fn from_millis(millis: u64) -> Self {
        Timestamp(millis)
    }

    /// Milliseconds since the epoch.
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Current wall-clock time.
    pub fn now() -> Result<Self, TimeError> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| TimeError::TimeOverflowError)?
            .as_millis();
        Ok(Timestamp(
            millis.try_into().map_err(|_| TimeError::TimeOverflowError)?,
        ))
    }

    /// Checked addition.
    pub fn checked_add(self, other: Timestamp) -> Result<Self, TimeError> {
        self.0
            .checked_add(other.0)
            .map(Timestamp)
            .ok_or(TimeError::TimeOverflowError)
    }

    /// Checked subtraction.
    pub fn checked_sub(self, other: Timestamp) -> Result<Self, TimeError> {
        self.0
            .checked_sub(other.0)
            .map(Timestamp)
            .ok_or(TimeError::TimeOverflowError)
    }

    /// Saturating addition.
    pub fn saturating_add(self, other: Timestamp) -> Self {
        Timestamp(self.0.saturating_add(other.0))
    }

    /// Saturating subtraction.
    pub fn saturating_sub(self, other: Timestamp) -> Self {
        Timestamp(self.0.saturating_sub(other.0))
    }

    /// Checked multiplication by a scalar.
    pub fn checked_mul(self, factor: u64) -> Result<Self, TimeError> {
        self.0
            .checked_mul(factor)
            .map(Timestamp)
            .ok_or(TimeError::TimeOverflowError)
    }

    /// Convert to a [`Duration`] (relative usage).
    pub fn to_duration(&self) -> Duration {
        Duration::from_millis(self.0)
    }

    /// Build from a [`Duration`] (relative usage).
    pub fn from_duration(duration: Duration) -> Result<Self, TimeError> {
        Ok(Timestamp(
            duration
                .as_millis()
                .try_into()
                .map_err(|_| TimeError::TimeOverflowError)?,
        ))
    }

    /// Seconds and leftover nanoseconds, for timestamp wire encodings.
    pub fn seconds_nanos(&self) -> (i64, i32) {
        ((self.0 / 1000) as i64, ((self.0 % 1000) * 1_000_000) as i32)
    }

    /// Rebuild from seconds and nanoseconds, truncating to milliseconds.
    pub fn from_seconds_nanos(seconds: i64, nanos: i32) -> Self {
        let seconds = seconds.max(0) as u64;
        let nanos = nanos.max(0) as u64;
        Timestamp(seconds.saturating_mul(1000).saturating_add(nanos / 1_000_000))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Timestamp {
    fn from(millis: u64) -> Self {
        Timestamp(millis)
    }
}

/// Varint serializer for [`Timestamp`].
#[derive(Clone, Default)]
pub struct TimestampSerializer {
    u64_serializer: U64VarIntSerializer,
}

impl TimestampSerializer {
    /// Create a timestamp serializer.
    pub const fn new() -> Self {
        Self {
            u64_serializer: U64VarIntSerializer::new(),
        }
    }
}

impl Serializer<Timestamp> for TimestampSerializer {
    fn serialize(&self, value: &Timestamp, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.u64_serializer.serialize(&value.0, buffer)
    }
}

/// Varint deserializer for [`Timestamp`].
#[derive(Clone)]
pub struct TimestampDeserializer {
    u64_deserializer: U64VarIntDeserializer,
}

impl TimestampDeserializer {
    /// Create a timestamp deserializer.
    pub const fn new() -> Self {
        Self {
            u64_deserializer: U64VarIntDeserializer::new(
                Bound::Included(0),
                Bound::Included(u64::MAX),
            ),
        }
    }
}

impl Default for TimestampDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<Timestamp> for TimestampDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Timestamp, E> {
        context("Failed timestamp deserialization", |input| {
            self.u64_deserializer
                .deserialize(input)
                .map(|(rest, millis)| (rest, Timestamp(millis)))
        })(buffer)
    }
}
