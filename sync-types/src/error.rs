//! Error types for the listsync wire format.

use thiserror::Error;

/// Errors that can occur while encoding or decoding wire types.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON serialization or parsing failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A relay or client message had an unexpected shape
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A public key could not be parsed from hex or bech32
    #[error("invalid public key: {0}")]
    InvalidKey(String),

    /// An event id was not 32 bytes of hex
    #[error("invalid event id: {0}")]
    InvalidEventId(String),

    /// Invalid data format
    #[error("invalid data: {0}")]
    InvalidData(String),
}
