//! Configuration for wirestream
//!
//! `Parameters` is the library-facing record handed to every transport and
//! connection manager. `Args` is the CLI/environment layer used by the
//! binary, parsed with clap.

use clap::Parser;
use std::time::Duration;
use url::Url;

use crate::types::{Result, TransportError};

/// Production streaming endpoint
pub const PRODUCTION_URL: &str = "wss://api.bitfinex.com/ws/2";

/// Sub-protocols offered during the handshake
pub const DEFAULT_SUBPROTOCOLS: [&str; 2] = ["p1", "p2"];

const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Transport and reconnect behaviour
#[derive(Debug, Clone)]
pub struct Parameters {
    /// WebSocket endpoint (ws:// or wss://)
    pub url: String,
    /// Accept any server certificate
    pub tls_skip_verify: bool,
    /// Reconnect after an unexpected disconnect
    pub auto_reconnect: bool,
    /// Delay before each reconnect attempt
    pub reconnect_interval: Duration,
    /// Maximum consecutive reconnect attempts (0 = unlimited)
    pub reconnect_attempts: u32,
    /// Upper bound on a graceful close
    pub shutdown_timeout: Duration,
    /// Replay subscriptions after a successful reconnect
    pub resubscribe_on_reconnect: bool,
    /// Liveness window for the consumer's heartbeat tracking
    pub heartbeat_timeout: Duration,
    /// Trace every frame sent and received
    pub log_transport: bool,
    /// Sub-protocols offered in `Sec-WebSocket-Protocol`
    pub subprotocols: Vec<String>,
    /// TCP receive buffer size in bytes
    pub read_buffer_size: usize,
    /// WebSocket write buffer size in bytes
    pub write_buffer_size: usize,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            url: PRODUCTION_URL.to_string(),
            tls_skip_verify: false,
            auto_reconnect: true,
            reconnect_interval: Duration::from_secs(3),
            reconnect_attempts: 15,
            shutdown_timeout: Duration::from_secs(5),
            resubscribe_on_reconnect: true,
            heartbeat_timeout: Duration::from_secs(30),
            log_transport: false,
            subprotocols: DEFAULT_SUBPROTOCOLS.iter().map(|p| p.to_string()).collect(),
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            write_buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl Parameters {
    /// Default parameters pointed at `url`
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Whether the reconnect policy caps the number of attempts
    pub fn is_bounded(&self) -> bool {
        self.reconnect_attempts > 0
    }

    /// Parse the endpoint, checking the scheme
    pub fn endpoint(&self) -> Result<Url> {
        let url = Url::parse(&self.url)
            .map_err(|e| TransportError::Config(format!("invalid url {}: {}", self.url, e)))?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(TransportError::Config(format!(
                "unsupported scheme '{}' (expected ws or wss)",
                other
            ))),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let url = self.endpoint()?;
        if url.host_str().is_none() {
            return Err(TransportError::Config(format!("url {} has no host", self.url)));
        }

        if self.subprotocols.is_empty() {
            return Err(TransportError::Config(
                "at least one sub-protocol is required".into(),
            ));
        }
        if let Some(bad) = self
            .subprotocols
            .iter()
            .find(|p| p.trim().is_empty() || p.contains(','))
        {
            return Err(TransportError::Config(format!(
                "invalid sub-protocol '{}'",
                bad
            )));
        }

        if self.read_buffer_size == 0 || self.write_buffer_size == 0 {
            return Err(TransportError::Config(
                "buffer sizes must be non-zero".into(),
            ));
        }

        Ok(())
    }
}

/// wirestream - tail a streaming WebSocket feed
#[derive(Parser, Debug, Clone)]
#[command(name = "wirestream")]
#[command(about = "Persistent WebSocket feed client with automatic reconnect")]
pub struct Args {
    /// WebSocket endpoint
    #[arg(long, env = "WS_URL", default_value = PRODUCTION_URL)]
    pub url: String,

    /// Skip TLS certificate verification
    #[arg(long, env = "WS_TLS_SKIP_VERIFY", default_value = "false")]
    pub tls_skip_verify: bool,

    /// Disable automatic reconnect
    #[arg(long, env = "WS_NO_RECONNECT", default_value = "false")]
    pub no_reconnect: bool,

    /// Delay between reconnect attempts in milliseconds
    #[arg(long, env = "WS_RECONNECT_INTERVAL_MS", default_value = "3000")]
    pub reconnect_interval_ms: u64,

    /// Maximum reconnect attempts (0 = unlimited)
    #[arg(long, env = "WS_RECONNECT_ATTEMPTS", default_value = "15")]
    pub reconnect_attempts: u32,

    /// Graceful shutdown bound in milliseconds
    #[arg(long, env = "WS_SHUTDOWN_TIMEOUT_MS", default_value = "5000")]
    pub shutdown_timeout_ms: u64,

    /// Heartbeat timeout in milliseconds
    #[arg(long, env = "WS_HEARTBEAT_TIMEOUT_MS", default_value = "30000")]
    pub heartbeat_timeout_ms: u64,

    /// Log every frame sent and received
    #[arg(long, env = "WS_LOG_TRANSPORT", default_value = "false")]
    pub log_transport: bool,

    /// Send timeout in milliseconds
    #[arg(long, env = "WS_SEND_TIMEOUT_MS", default_value = "5000")]
    pub send_timeout_ms: u64,

    /// JSON payloads to send once connected (repeatable)
    #[arg(long = "send")]
    pub send: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,
}

impl Args {
    /// Build transport parameters from CLI/env
    pub fn parameters(&self) -> Parameters {
        Parameters {
            url: self.url.clone(),
            tls_skip_verify: self.tls_skip_verify,
            auto_reconnect: !self.no_reconnect,
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
            reconnect_attempts: self.reconnect_attempts,
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
            heartbeat_timeout: Duration::from_millis(self.heartbeat_timeout_ms),
            log_transport: self.log_transport,
            ..Default::default()
        }
    }

    /// Send deadline offset
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = Parameters::default();
        assert!(params.auto_reconnect);
        assert_eq!(params.reconnect_interval, Duration::from_secs(3));
        assert_eq!(params.reconnect_attempts, 15);
        assert_eq!(params.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(params.heartbeat_timeout, Duration::from_secs(30));
        assert_eq!(params.subprotocols, vec!["p1", "p2"]);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        assert!(Parameters::with_url("http://example.com").validate().is_err());
        assert!(Parameters::with_url("not a url").validate().is_err());

        let mut params = Parameters::with_url("ws://127.0.0.1:9000");
        params.subprotocols.clear();
        assert!(params.validate().is_err());

        let mut params = Parameters::with_url("ws://127.0.0.1:9000");
        params.subprotocols = vec!["a, b".into()];
        assert!(params.validate().is_err());

        let mut params = Parameters::with_url("ws://127.0.0.1:9000");
        params.write_buffer_size = 0;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_args_map_to_parameters() {
        let args = Args::parse_from([
            "wirestream",
            "--url",
            "ws://localhost:9001",
            "--no-reconnect",
            "--reconnect-attempts",
            "0",
            "--send",
            r#"{"event":"ping"}"#,
        ]);
        let params = args.parameters();
        assert_eq!(params.url, "ws://localhost:9001");
        assert!(!params.auto_reconnect);
        assert!(!params.is_bounded());
        assert_eq!(args.send.len(), 1);
    }
}
