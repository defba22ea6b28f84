//! Error types for altsync

use thiserror::Error;

/// Rejections for data that arrived in a malformed or untrusted shape.
///
/// These never surface to the user: the channel is best-effort and a peer
/// may send anything, so callers log them at debug level and drop the input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Malformed peer key: {0:?}")]
    MalformedPeerKey(String),

    #[error("Timestamp out of range: {0}")]
    TimestampOutOfRange(u64),

    #[error("Empty character name")]
    EmptyCharacterName,

    #[error("{field} too long: {len} bytes, limit {max}")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("Control characters in {0}")]
    ControlCharacters(&'static str),

    #[error("Claims ownership of the local profile")]
    SelfOwned,
}

/// Serialization failures while building an outbound envelope
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Serialization failed: {0}")]
    Serialize(String),

    #[error("Nothing to encode")]
    Empty,
}

/// Failures while opening an inbound envelope, one variant per stage
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Envelope too short: {actual} bytes")]
    TooShort { actual: usize },

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u8, actual: u8 },

    #[error("Decompression failed: {0}")]
    DecompressFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializeFailed(String),
}

/// Top-level altsync errors
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("No local profile registered yet")]
    NoSelfProfile,

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for altsync operations
pub type SyncResult<T> = Result<T, SyncError>;
