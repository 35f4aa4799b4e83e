//! Error types for wirestream
//!
//! Errors are `Clone` because a single terminal error is fanned out to every
//! observer of a transport's `Done` handle.

/// Main error type for transport and connection manager operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dial failed: {0}")]
    Dial(String),

    #[error("Handshake failed: {reason}")]
    Handshake {
        /// HTTP status returned when the upgrade itself was rejected
        status: Option<u16>,
        reason: String,
    },

    #[error("Websocket not connected")]
    NotConnected,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Websocket connection closed")]
    Closed,

    #[error("Connection closed by remote (code {code}): {reason}")]
    RemoteClosed { code: u16, reason: String },

    #[error("Read error: {0}")]
    Read(String),

    #[error("Write error: {0}")]
    Write(String),

    #[error("Reconnect attempts exhausted after {attempts} tries: {last}")]
    ReconnectExhausted {
        attempts: u32,
        last: Box<TransportError>,
    },
}

impl TransportError {
    /// Remote HTTP status code of a rejected upgrade, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Handshake { status, .. } => *status,
            Self::ReconnectExhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    /// Whether this error ended a connection attempt or a live connection,
    /// as opposed to a caller-side mistake.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::Dial(_)
                | Self::Handshake { .. }
                | Self::RemoteClosed { .. }
                | Self::Read(_)
                | Self::Closed
        )
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Dial(err.to_string())
    }
}

/// Result type alias for wirestream operations
pub type Result<T> = std::result::Result<T, TransportError>;
