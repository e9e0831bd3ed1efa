//! Error types for ride-client.

use thiserror::Error;

/// Main error type for all connection operations.
#[derive(Debug, Error)]
pub enum RideError {
    /// I/O error during socket, listener, or process operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (command payloads).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed frame on the wire (bad length field).
    #[error("bad frame: {0}")]
    Frame(String),

    /// Peer offered or selected a protocol version we do not speak.
    #[error("unsupported protocol version: {0}")]
    UnsupportedProtocol(String),

    /// Peer speaks the legacy pre-framing dialect.
    #[error("peer speaks a legacy pre-framing protocol")]
    LegacyPeer,

    /// Write attempted with no active transport.
    #[error("no active transport")]
    NotConnected,

    /// A transport is already held by this connection.
    #[error("a transport is already active for this connection")]
    TransportActive,

    /// Connection closed while an operation was in flight.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Result type alias using RideError.
pub type Result<T> = std::result::Result<T, RideError>;
