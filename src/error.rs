//! Error types for thingwire.

use thiserror::Error;

/// Main error type for all thingwire operations.
#[derive(Debug, Error)]
pub enum ThingwireError {
    /// I/O error raised by a transport implementation.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// No codec registered for the requested media type.
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// The peer's stream is gone; no further frames can be delivered.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias using ThingwireError.
pub type Result<T> = std::result::Result<T, ThingwireError>;
