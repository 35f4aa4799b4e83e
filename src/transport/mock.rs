//! Scripted in-memory sockets for tests

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use super::{Dialer, Frame, FrameReader, FrameWriter, ReadError, Socket};
use crate::config::Parameters;
use crate::types::{Result, TransportError};

/// What the next dial does
#[derive(Debug, Clone, Copy)]
pub(crate) enum Outcome {
    Accept,
    Refuse(Option<u16>),
    /// Fails the way an unusable configuration does
    Misconfigured,
}

pub(crate) struct MockDialer {
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    delay: Option<Duration>,
    dials: AtomicUsize,
    dial_spans: Mutex<Vec<Option<&'static str>>>,
    peers: Mutex<Vec<MockPeer>>,
}

impl MockDialer {
    /// Every dial succeeds
    pub(crate) fn accepting() -> Self {
        Self::scripted([], Outcome::Accept)
    }

    /// Follow `script`, then keep answering with `fallback`
    pub(crate) fn scripted(script: impl IntoIterator<Item = Outcome>, fallback: Outcome) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            delay: None,
            dials: AtomicUsize::new(0),
            dial_spans: Mutex::new(Vec::new()),
            peers: Mutex::new(Vec::new()),
        }
    }

    /// Hold every handshake for `delay`
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    /// Name of the span each dial ran in
    pub(crate) fn dial_spans(&self) -> Vec<Option<&'static str>> {
        self.dial_spans.lock().unwrap().clone()
    }

    pub(crate) fn peers(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    /// Remote end of the `index`-th accepted connection
    pub(crate) fn peer(&self, index: usize) -> MockPeer {
        self.peers.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(&self, _params: &Parameters) -> Result<Socket> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let span = tracing::Span::current().metadata().map(|meta| meta.name());
        self.dial_spans.lock().unwrap().push(span);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);

        match outcome {
            Outcome::Refuse(status) => Err(TransportError::Handshake {
                status,
                reason: "bad handshake".into(),
            }),
            Outcome::Misconfigured => Err(TransportError::Config("no usable TLS setup".into())),
            Outcome::Accept => {
                let (peer, socket) = MockPeer::pair();
                self.peers.lock().unwrap().push(peer);
                Ok(socket)
            }
        }
    }
}

#[derive(Default)]
struct PeerShared {
    writes: Mutex<Vec<String>>,
    closes: AtomicUsize,
    frames_read: AtomicUsize,
}

/// Server side of a mock connection
#[derive(Clone)]
pub(crate) struct MockPeer {
    frames: mpsc::UnboundedSender<std::result::Result<Frame, ReadError>>,
    shared: Arc<PeerShared>,
}

impl MockPeer {
    fn pair() -> (Self, Socket) {
        let (frames, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(PeerShared::default());
        let socket = Socket {
            writer: Box::new(MockWriter {
                shared: Arc::clone(&shared),
                closed: false,
            }),
            reader: Box::new(MockReader {
                frames: rx,
                shared: Arc::clone(&shared),
            }),
        };
        (Self { frames, shared }, socket)
    }

    pub(crate) fn push(&self, payload: &str) {
        let _ = self.frames.send(Ok(Frame::Payload(payload.as_bytes().to_vec())));
    }

    pub(crate) fn push_close(&self, code: u16, reason: &str) {
        let _ = self.frames.send(Ok(Frame::Close {
            code,
            reason: reason.to_string(),
        }));
    }

    pub(crate) fn fail(&self, reason: &str) {
        let _ = self.frames.send(Err(ReadError::Failed(reason.to_string())));
    }

    /// Make the next read look like the socket was closed on our side
    pub(crate) fn end_locally(&self) {
        let _ = self.frames.send(Err(ReadError::LocallyClosed));
    }

    pub(crate) fn writes(&self) -> Vec<String> {
        self.shared.writes.lock().unwrap().clone()
    }

    pub(crate) fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn frames_read(&self) -> usize {
        self.shared.frames_read.load(Ordering::SeqCst)
    }
}

struct MockReader {
    frames: mpsc::UnboundedReceiver<std::result::Result<Frame, ReadError>>,
    shared: Arc<PeerShared>,
}

#[async_trait]
impl FrameReader for MockReader {
    async fn read_frame(&mut self) -> Option<std::result::Result<Frame, ReadError>> {
        let frame = self.frames.recv().await;
        if frame.is_some() {
            self.shared.frames_read.fetch_add(1, Ordering::SeqCst);
        }
        frame
    }
}

struct MockWriter {
    shared: Arc<PeerShared>,
    closed: bool,
}

#[async_trait]
impl FrameWriter for MockWriter {
    async fn write_text(&mut self, text: String) -> Result<()> {
        if self.closed {
            return Err(TransportError::Write("write on closed socket".into()));
        }
        self.shared.writes.lock().unwrap().push(text);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
