//! Transport layer
//!
//! A `Transport` owns exactly one physical connection for its whole life. The
//! socket itself sits behind the `Dialer`/`FrameReader`/`FrameWriter` seam so
//! the lifecycle can run against tokio-tungstenite in production and against a
//! scripted socket in tests.

pub mod connection;
pub mod done;
pub mod proxy;
pub mod tls;
pub mod websocket;

#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;

use crate::config::Parameters;
use crate::types::Result;

pub use connection::{Inbound, Transport};
pub use done::{Done, Termination};
pub use websocket::WebSocketDialer;

/// A frame delivered by the read half
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text or binary payload, forwarded as raw bytes
    Payload(Vec<u8>),
    /// Close frame sent by the remote
    Close { code: u16, reason: String },
}

/// Read failure, classified for the receive loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// The socket was already closed on our side
    LocallyClosed,
    /// Any other failure
    Failed(String),
}

/// Read half of a connection
#[async_trait]
pub trait FrameReader: Send {
    /// Next frame, or `None` once the stream has ended
    async fn read_frame(&mut self) -> Option<std::result::Result<Frame, ReadError>>;
}

/// Write half of a connection
#[async_trait]
pub trait FrameWriter: Send {
    /// Write a single text frame
    async fn write_text(&mut self, text: String) -> Result<()>;

    /// Close the underlying socket
    async fn close(&mut self) -> Result<()>;
}

/// A freshly handshaken connection, split into halves
pub struct Socket {
    pub writer: Box<dyn FrameWriter>,
    pub reader: Box<dyn FrameReader>,
}

/// Opens connections (allows mocking in tests)
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, params: &Parameters) -> Result<Socket>;
}
