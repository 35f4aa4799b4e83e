//! Wirestream - persistent WebSocket transport for streaming feeds
//!
//! A `Transport` owns one physical connection: it performs the handshake,
//! pumps inbound payloads to a single consumer with backpressure, serializes
//! outbound JSON sends and tears down exactly once. A `ConnectionManager`
//! layers the reconnect policy on top, swapping in fresh transports while the
//! caller keeps reading from one stream.

pub mod config;
pub mod manager;
pub mod transport;
pub mod types;

pub use config::{Args, Parameters};
pub use manager::{ConnectionManager, ManagerState, Resubscriber};
pub use transport::{Dialer, Done, Inbound, Termination, Transport, WebSocketDialer};
pub use types::{Result, TransportError};
