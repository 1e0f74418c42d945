use displaydoc::Display;
use thiserror::Error;

/// Errors of the hash crate.
#[non_exhaustive]
#[derive(Display, Error, Debug, Clone)]
pub enum CortenHashError {
    /// parsing error: {0}
    ParsingError(String),
    /// wrong size: expected {0} bytes, got {1}
    WrongSize(usize, usize),
}
