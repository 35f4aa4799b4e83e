//! Shared types for wirestream

pub mod error;

pub use error::{Result, TransportError};
