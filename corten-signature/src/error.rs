use displaydoc::Display;
use thiserror::Error;

/// Errors of the signature crate.
#[non_exhaustive]
#[derive(Display, Error, Debug, Clone)]
pub enum CortenSignatureError {
    /// parsing error: {0}
    ParsingError(String),
    /// signature verification failed: {0}
    VerificationError(String),
    /// wrong size: expected {0} bytes, got {1}
    WrongSize(usize, usize),
}
