//! Error types for container decoding

use thiserror::Error;

/// Result type for container operations
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Classified decode failures.
///
/// `TruncatedBody` is non-fatal in the normal decode path: the decoder
/// logs it and keeps the records that fully fit. It is returned as an
/// error only by strict helpers that require a complete body.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed container: {0}")]
    MalformedContainer(String),

    #[error("unreadable header: {0}")]
    UnreadableHeader(String),

    #[error("truncated body: have {actual} bytes, need {expected}")]
    TruncatedBody { expected: usize, actual: usize },
}
