//! Transport state machine and message pump
//!
//! A `Transport` moves `Unconnected -> Connected -> Closed` exactly once.
//! While connected, one background receive loop owns the read half, the
//! inbound sender and the terminal signal. Teardown therefore has a single
//! owner: whichever of `close()` or a read failure clears the connected
//! state first decides the outcome, and the loop's cleanup closes the socket
//! and both streams.
//!
//! Failed handshakes close both streams immediately, so callers never block
//! on `listen()`/`done()` after a failed `connect()`.

use serde::Serialize;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn, Instrument, Span};

use super::done::{Done, DoneSignal};
use super::{Dialer, Frame, FrameReader, FrameWriter, ReadError};
use crate::config::Parameters;
use crate::types::{Result, TransportError};

/// Inbound payload stream; closes when the transport terminates
pub type Inbound = mpsc::Receiver<Vec<u8>>;

type SharedWriter = Arc<Mutex<Box<dyn FrameWriter>>>;

enum State {
    /// Streams are parked here until a receive loop takes them over
    Unconnected {
        inbound: mpsc::Sender<Vec<u8>>,
        signal: DoneSignal,
    },
    Connected(Link),
    Closed,
}

struct Link {
    writer: SharedWriter,
    /// Asks the receive loop to tear down; dropping it has the same effect
    stop: oneshot::Sender<()>,
}

struct Inner {
    params: Arc<Parameters>,
    dialer: Arc<dyn Dialer>,
    span: Span,
    /// Serializes connect() calls
    connecting: Mutex<()>,
    /// Never held across socket I/O
    state: Mutex<State>,
    listener: StdMutex<Option<Inbound>>,
    done: Done,
}

/// Single-use persistent connection
pub struct Transport {
    inner: Arc<Inner>,
}

impl Transport {
    /// Create an unconnected transport. `span` is the logging context every
    /// event of this transport is recorded under.
    pub fn new(params: Arc<Parameters>, dialer: Arc<dyn Dialer>, span: Span) -> Self {
        let (inbound, listener) = mpsc::channel(1);
        let (signal, done) = DoneSignal::new();

        Self {
            inner: Arc::new(Inner {
                params,
                dialer,
                span,
                connecting: Mutex::new(()),
                state: Mutex::new(State::Unconnected { inbound, signal }),
                listener: StdMutex::new(Some(listener)),
                done,
            }),
        }
    }

    /// Perform the handshake and start the receive loop.
    ///
    /// A no-op on a connected transport. Fails with `Closed` once the
    /// transport has been closed.
    pub async fn connect(&self) -> Result<()> {
        let _connecting = self.inner.connecting.lock().await;
        match &*self.inner.state.lock().await {
            State::Connected(_) => return Ok(()),
            State::Closed => return Err(TransportError::Closed),
            State::Unconnected { .. } => {}
        }

        let span = &self.inner.span;
        info!(parent: span, "Connecting ws to {}", self.inner.params.url);
        let dialed = self
            .inner
            .dialer
            .dial(&self.inner.params)
            .instrument(span.clone())
            .await;

        let mut state = self.inner.state.lock().await;
        let socket = match dialed {
            Ok(socket) => socket,
            Err(err) => {
                match err.status() {
                    Some(code) => error!(parent: span, "Bad handshake: status code {}", code),
                    None => error!(parent: span, "Failed to connect: {}", err),
                }
                // No receive loop will ever run, so close the streams here
                if let State::Unconnected { inbound, signal } =
                    std::mem::replace(&mut *state, State::Closed)
                {
                    signal.finish(Some(err.clone()));
                    drop(inbound);
                }
                return Err(err);
            }
        };

        let (inbound, signal) = match std::mem::replace(&mut *state, State::Closed) {
            State::Unconnected { inbound, signal } => (inbound, signal),
            previous => {
                // Closed while the handshake was in flight
                *state = previous;
                drop(state);
                let mut writer = socket.writer;
                if let Err(e) = writer.close().await {
                    debug!(parent: span, "Error closing abandoned websocket: {}", e);
                }
                return Err(TransportError::Closed);
            }
        };

        let (stop, stopped) = oneshot::channel();
        let writer: SharedWriter = Arc::new(Mutex::new(socket.writer));
        *state = State::Connected(Link {
            writer: Arc::clone(&writer),
            stop,
        });
        drop(state);

        let receive_loop = ReceiveLoop {
            inner: Arc::clone(&self.inner),
            reader: socket.reader,
            writer,
            inbound,
            signal,
            stopped,
        };
        tokio::spawn(receive_loop.run().instrument(span.clone()));

        info!(parent: span, "Connected to {}", self.inner.params.url);
        Ok(())
    }

    /// Serialize `msg` to JSON and write it as one text frame.
    ///
    /// A `deadline` that has already passed cancels the send before any
    /// write. Write failures are returned as-is; tearing the connection down
    /// is left to the receive loop.
    pub async fn send<T: Serialize + ?Sized>(&self, deadline: Instant, msg: &T) -> Result<()> {
        let handle = self.writer().await.ok_or(TransportError::NotConnected)?;
        let text = serde_json::to_string(msg)?;

        if Instant::now() >= deadline {
            return Err(TransportError::Cancelled);
        }
        if self.inner.done.is_done() {
            return Err(TransportError::Closed);
        }

        let mut writer = timeout_at(deadline, handle.lock())
            .await
            .map_err(|_| TransportError::Cancelled)?;
        // The receive loop may have torn the connection down since the first check
        if !self.is_connected().await {
            return Err(TransportError::NotConnected);
        }

        if self.inner.params.log_transport {
            debug!(parent: &self.inner.span, "ws->srv: {}", text);
        }
        timeout_at(deadline, writer.write_text(text))
            .await
            .map_err(|_| TransportError::Cancelled)?
    }

    /// Close the connection. Idempotent and never waits on socket I/O; the
    /// receive loop performs the socket close and closes both streams.
    pub async fn close(&self) {
        let mut state = self.inner.state.lock().await;
        match std::mem::replace(&mut *state, State::Closed) {
            State::Connected(link) => {
                info!(parent: &self.inner.span, "Closing connection to {}", self.inner.params.url);
                let _ = link.stop.send(());
            }
            State::Unconnected { inbound, signal } => {
                signal.finish(None);
                drop(inbound);
            }
            State::Closed => {}
        }
    }

    /// Take the inbound payload stream. Only the first call gets it.
    pub fn listen(&self) -> Option<Inbound> {
        self.inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Terminal notification for this transport
    pub fn done(&self) -> Done {
        self.inner.done.clone()
    }

    pub async fn is_connected(&self) -> bool {
        matches!(&*self.inner.state.lock().await, State::Connected(_))
    }

    pub fn parameters(&self) -> &Parameters {
        &self.inner.params
    }

    async fn writer(&self) -> Option<SharedWriter> {
        match &*self.inner.state.lock().await {
            State::Connected(link) => Some(Arc::clone(&link.writer)),
            _ => None,
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        // Stop the receive loop so an abandoned transport does not keep its socket
        if let Ok(mut state) = self.inner.state.try_lock() {
            if let State::Connected(link) = std::mem::replace(&mut *state, State::Closed) {
                let _ = link.stop.send(());
            }
        }
    }
}

/// Background reader for one connection
struct ReceiveLoop {
    inner: Arc<Inner>,
    reader: Box<dyn FrameReader>,
    writer: SharedWriter,
    inbound: mpsc::Sender<Vec<u8>>,
    signal: DoneSignal,
    stopped: oneshot::Receiver<()>,
}

impl ReceiveLoop {
    async fn run(mut self) {
        let failure = self.pump().await;
        self.cleanup(failure).await;
    }

    /// Forward frames until stopped or the socket fails. Returns the failure,
    /// or `None` when the shutdown was local.
    async fn pump(&mut self) -> Option<TransportError> {
        let log_transport = self.inner.params.log_transport;

        loop {
            let frame = tokio::select! {
                biased;
                _ = &mut self.stopped => return None,
                frame = self.reader.read_frame() => frame,
            };

            match frame {
                Some(Ok(Frame::Payload(data))) => {
                    if log_transport {
                        debug!("srv->ws: {}", String::from_utf8_lossy(&data));
                    }
                    // Blocks while the consumer is behind
                    tokio::select! {
                        biased;
                        _ = &mut self.stopped => return None,
                        sent = self.inbound.send(data) => {
                            if sent.is_err() {
                                debug!("Inbound stream dropped, discarding message");
                            }
                        }
                    }
                }
                Some(Ok(Frame::Close { code, reason })) => {
                    error!("Close error code: {}", code);
                    return Some(TransportError::RemoteClosed { code, reason });
                }
                Some(Err(ReadError::LocallyClosed)) => {
                    debug!("Read on closed connection, stopping receive loop");
                    return None;
                }
                Some(Err(ReadError::Failed(reason))) => {
                    return Some(TransportError::Read(reason));
                }
                None => {
                    return Some(TransportError::Read(
                        "stream ended without close frame".into(),
                    ));
                }
            }
        }
    }

    /// The one teardown path: clear the handle, close the socket, then close
    /// the terminal and inbound streams.
    async fn cleanup(self, failure: Option<TransportError>) {
        let initiated_here = {
            let mut state = self.inner.state.lock().await;
            matches!(
                std::mem::replace(&mut *state, State::Closed),
                State::Connected(_)
            )
        };
        // close() got there first, so this is an intentional shutdown
        let failure = if initiated_here { failure } else { None };

        let shutdown_timeout = self.inner.params.shutdown_timeout;
        match timeout(shutdown_timeout, async { self.writer.lock().await.close().await }).await {
            Ok(Ok(())) => debug!("Websocket closed"),
            Ok(Err(e)) => error!("Error closing websocket: {}", e),
            Err(_) => warn!("Timed out closing websocket after {:?}", shutdown_timeout),
        }

        match &failure {
            Some(err) => info!("Disconnected from {}: {}", self.inner.params.url, err),
            None => info!("Disconnected from {}", self.inner.params.url),
        }
        self.signal.finish(failure);
        drop(self.inbound);
    }
}
