use displaydoc::Display;
use thiserror::Error;

/// Errors of the time crate.
#[non_exhaustive]
#[derive(Display, Error, Debug, Clone)]
pub enum TimeError {
    /// time overflow
    TimeOverflowError,
    /// time conversion error: {0}
    ConversionError(String),
}
