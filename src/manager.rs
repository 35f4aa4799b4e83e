//! Connection manager - reconnect policy over single-use transports
//!
//! The manager owns the current `Transport` and replaces it wholesale when it
//! terminates unexpectedly. Callers see one inbound stream and one terminal
//! notification for the manager's whole life, whichever transport is live.
//!
//! The attempt counter counts reconnect attempts since the last successful
//! connect: each retry waits `reconnect_interval`, then bumps the counter and
//! dials a fresh transport. A bounded policy gives up once the counter has
//! reached `reconnect_attempts`.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::config::Parameters;
use crate::transport::done::DoneSignal;
use crate::transport::{Dialer, Done, Inbound, Transport, WebSocketDialer};
use crate::types::{Result, TransportError};

/// Lifecycle of a connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
    Closed,
}

/// Replays subscriptions on a freshly reconnected transport
#[async_trait]
pub trait Resubscriber: Send + Sync {
    async fn resubscribe(&self, transport: &Transport) -> Result<()>;
}

struct Shared {
    params: Arc<Parameters>,
    dialer: Arc<dyn Dialer>,
    span: Span,
    resubscriber: Option<Arc<dyn Resubscriber>>,
    attempts: AtomicU32,
    state: watch::Sender<ManagerState>,
    current: RwLock<Option<Arc<Transport>>>,
    /// Handed to the supervisor once it starts
    inbound: StdMutex<Option<mpsc::Sender<Vec<u8>>>>,
    listener: StdMutex<Option<Inbound>>,
    signal: DoneSignal,
    done: Done,
    shutdown: watch::Sender<bool>,
}

/// Persistent connection with automatic reconnect
pub struct ConnectionManager {
    shared: Arc<Shared>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Create an idle manager. `span` is the logging context for the manager
    /// and every transport it creates.
    pub fn new(
        params: Parameters,
        dialer: Arc<dyn Dialer>,
        span: Span,
        resubscriber: Option<Arc<dyn Resubscriber>>,
    ) -> Self {
        let (inbound, listener) = mpsc::channel(1);
        let (signal, done) = DoneSignal::new();
        let (state, _) = watch::channel(ManagerState::Idle);
        let (shutdown, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                params: Arc::new(params),
                dialer,
                span,
                resubscriber,
                attempts: AtomicU32::new(0),
                state,
                current: RwLock::new(None),
                inbound: StdMutex::new(Some(inbound)),
                listener: StdMutex::new(Some(listener)),
                signal,
                done,
                shutdown,
            }),
            supervisor: Mutex::new(None),
        }
    }

    /// Manager dialing real WebSocket connections
    pub fn websocket(params: Parameters, span: Span) -> Self {
        Self::new(params, Arc::new(WebSocketDialer), span, None)
    }

    /// Connect and start supervising the connection.
    ///
    /// With auto-reconnect on, a failed initial dial is retried under the
    /// same policy as a lost connection. Resolves once connected or once the
    /// policy gives up, in which case the manager has failed.
    pub async fn connect(&self) -> Result<()> {
        let mut supervisor = self.supervisor.lock().await;
        match self.state() {
            ManagerState::Idle => {}
            ManagerState::Connecting | ManagerState::Connected | ManagerState::Reconnecting => {
                return Ok(())
            }
            ManagerState::Failed | ManagerState::Closed => return Err(TransportError::Closed),
        }

        let shared = &self.shared;
        let transport = match shared.establish(None).await {
            Ok(transport) => transport,
            // close() owns the outcome
            Err(TransportError::Cancelled) => return Err(TransportError::Cancelled),
            Err(err) => {
                shared.fail(&err);
                shared.take_inbound();
                return Err(err);
            }
        };

        let Some(inbound) = shared.take_inbound() else {
            return Err(TransportError::Closed);
        };
        let task = Arc::clone(shared).supervise(transport, inbound);
        *supervisor = Some(tokio::spawn(task.instrument(shared.span.clone())));
        Ok(())
    }

    /// Send through the current transport
    pub async fn send<T: Serialize + ?Sized>(&self, deadline: Instant, msg: &T) -> Result<()> {
        let transport = self
            .shared
            .current
            .read()
            .await
            .clone()
            .ok_or(TransportError::NotConnected)?;
        transport.send(deadline, msg).await
    }

    /// Take the inbound payload stream. Only the first call gets it; the
    /// stream survives reconnects and ends when the manager terminates.
    pub fn listen(&self) -> Option<Inbound> {
        self.shared
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Terminal notification for the manager
    pub fn done(&self) -> Done {
        self.shared.done.clone()
    }

    pub fn state(&self) -> ManagerState {
        *self.shared.state.borrow()
    }

    /// Reconnect attempts since the last successful connect
    pub fn attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    pub fn parameters(&self) -> &Parameters {
        &self.shared.params
    }

    /// Shut down. Waits at most `shutdown_timeout` for the transport and the
    /// supervisor, then gives up on them with a warning.
    pub async fn close(&self) {
        let shared = &self.shared;
        if shared.shutdown.send_replace(true) {
            return;
        }

        let span = &shared.span;
        let shutdown_timeout = shared.params.shutdown_timeout;
        let deadline = Instant::now() + shutdown_timeout;
        info!(parent: span, "Closing connection manager for {}", shared.params.url);

        let current = shared.current.write().await.take();
        if let Some(transport) = current {
            transport.close().await;
            let mut done = transport.done();
            if timeout_at(deadline, done.wait()).await.is_err() {
                warn!(
                    parent: span,
                    "Transport did not close within {:?}", shutdown_timeout
                );
            }
        }

        match timeout_at(deadline, self.supervisor.lock()).await {
            Ok(mut supervisor) => {
                if let Some(mut handle) = supervisor.take() {
                    if timeout_at(deadline, &mut handle).await.is_err() {
                        warn!(
                            parent: span,
                            "Supervisor did not stop within {:?}, aborting", shutdown_timeout
                        );
                        handle.abort();
                    }
                }
            }
            Err(_) => warn!(
                parent: span,
                "Connect still in progress after {:?}", shutdown_timeout
            ),
        }

        shared.set_state(ManagerState::Closed);
        shared.signal.finish(None);
        shared.take_inbound();
        info!(parent: span, "Connection manager closed");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shared.shutdown.send_replace(true);
        if let Ok(mut supervisor) = self.supervisor.try_lock() {
            if let Some(handle) = supervisor.take() {
                handle.abort();
            }
        }
    }
}

impl Shared {
    fn set_state(&self, next: ManagerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(parent: &self.span, "Manager state {:?} -> {:?}", previous, next);
        }
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn take_inbound(&self) -> Option<mpsc::Sender<Vec<u8>>> {
        self.inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn fail(&self, err: &TransportError) {
        error!(parent: &self.span, "Connection manager failed: {}", err);
        self.set_state(ManagerState::Failed);
        self.signal.finish(Some(err.clone()));
    }

    /// Dial transports until one connects. `failure` is the error that
    /// prompted this call, if any; it is retried under the reconnect policy.
    async fn establish(&self, mut failure: Option<TransportError>) -> Result<Arc<Transport>> {
        loop {
            if let Some(err) = failure.take() {
                self.back_off(err).await?;
            }

            self.set_state(ManagerState::Connecting);
            let transport = Arc::new(Transport::new(
                Arc::clone(&self.params),
                Arc::clone(&self.dialer),
                self.span.clone(),
            ));
            *self.current.write().await = Some(Arc::clone(&transport));
            // close() raises the flag before taking the current transport
            if self.shutdown_requested() {
                transport.close().await;
                return Err(TransportError::Cancelled);
            }

            let mut shutdown = self.shutdown.subscribe();
            let connected = tokio::select! {
                connected = transport.connect() => connected,
                _ = requested(&mut shutdown) => {
                    transport.close().await;
                    return Err(TransportError::Cancelled);
                }
            };

            match connected {
                Ok(()) => {
                    if self.shutdown_requested() {
                        transport.close().await;
                        return Err(TransportError::Cancelled);
                    }
                    self.attempts.store(0, Ordering::SeqCst);
                    self.set_state(ManagerState::Connected);
                    return Ok(transport);
                }
                Err(err) => failure = Some(err),
            }
        }
    }

    /// Apply the reconnect policy to `err`: wait out the interval, or return
    /// the error that ends the manager.
    async fn back_off(&self, err: TransportError) -> Result<()> {
        if self.shutdown_requested() {
            return Err(TransportError::Cancelled);
        }
        // Retrying cannot fix a bad configuration
        if !self.params.auto_reconnect || !err.is_connection_failure() {
            return Err(err);
        }

        let attempts = self.attempts.load(Ordering::SeqCst);
        if self.params.is_bounded() && attempts >= self.params.reconnect_attempts {
            error!(
                parent: &self.span,
                "Max reconnection attempts ({}) reached", self.params.reconnect_attempts
            );
            return Err(TransportError::ReconnectExhausted {
                attempts,
                last: Box::new(err),
            });
        }

        self.set_state(ManagerState::Reconnecting);
        warn!(
            parent: &self.span,
            "Reconnecting in {:?} (attempt {})",
            self.params.reconnect_interval,
            attempts + 1
        );

        let mut shutdown = self.shutdown.subscribe();
        tokio::select! {
            _ = sleep(self.params.reconnect_interval) => {}
            _ = requested(&mut shutdown) => {
                info!(parent: &self.span, "Shutdown received during reconnect wait");
                return Err(TransportError::Cancelled);
            }
        }

        self.attempts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Forward payloads from each live transport and replace it when it dies
    async fn supervise(self: Arc<Self>, mut transport: Arc<Transport>, inbound: mpsc::Sender<Vec<u8>>) {
        let mut shutdown = self.shutdown.subscribe();

        let failure = loop {
            let lost = forward(&transport, &inbound, &mut shutdown).await;
            if self.shutdown_requested() {
                break None;
            }

            // Nobody asked for this one to stop
            let err = lost.unwrap_or(TransportError::Closed);
            warn!("Connection lost: {}", err);

            match self.establish(Some(err)).await {
                Ok(next) => {
                    transport = next;
                    info!("Reconnected to {}", self.params.url);
                    if self.params.resubscribe_on_reconnect {
                        if let Some(resubscriber) = &self.resubscriber {
                            if let Err(e) = resubscriber.resubscribe(&transport).await {
                                error!("Resubscribe after reconnect failed: {}", e);
                            }
                        }
                    }
                }
                Err(TransportError::Cancelled) => break None,
                Err(err) => break Some(err),
            }
        };

        let current = self.current.write().await.take();
        if let Some(transport) = current {
            transport.close().await;
        }
        if let Some(err) = failure {
            self.fail(&err);
        }
        debug!("Supervisor stopped");
    }
}

/// Resolves once shutdown is requested. Never resolves if the flag can no
/// longer change.
async fn requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|requested| *requested).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Pump one transport's payloads into the manager stream until it
/// terminates. Returns its terminal error, or `None` on shutdown or a clean
/// termination.
async fn forward(
    transport: &Transport,
    inbound: &mpsc::Sender<Vec<u8>>,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<TransportError> {
    if let Some(mut payloads) = transport.listen() {
        loop {
            tokio::select! {
                payload = payloads.recv() => match payload {
                    Some(data) => tokio::select! {
                        sent = inbound.send(data) => {
                            if sent.is_err() {
                                debug!("Manager stream dropped, discarding message");
                            }
                        }
                        _ = requested(shutdown) => return None,
                    },
                    None => break,
                },
                _ = requested(shutdown) => return None,
            }
        }
    }
    transport.done().wait().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockDialer, Outcome};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn params(interval_ms: u64, attempts: u32) -> Parameters {
        let mut params = Parameters::with_url("ws://127.0.0.1:9");
        params.reconnect_interval = Duration::from_millis(interval_ms);
        params.reconnect_attempts = attempts;
        params.shutdown_timeout = Duration::from_secs(1);
        params
    }

    fn manager(params: Parameters, dialer: &Arc<MockDialer>) -> ConnectionManager {
        ConnectionManager::new(params, dialer.clone(), Span::none(), None)
    }

    async fn settle(done: &mut Done) -> Option<TransportError> {
        tokio::time::timeout(Duration::from_secs(2), done.wait())
            .await
            .expect("manager never terminated")
    }

    async fn next(inbound: &mut Inbound) -> Option<Vec<u8>> {
        tokio::time::timeout(Duration::from_secs(2), inbound.recv())
            .await
            .expect("inbound stream stalled")
    }

    async fn eventually(what: &str, check: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !check() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_initial_failures_are_retried_until_connected() {
        let dialer = Arc::new(MockDialer::scripted(
            [Outcome::Refuse(Some(503)); 3],
            Outcome::Accept,
        ));
        let manager = manager(params(10, 3), &dialer);

        let started = Instant::now();
        manager.connect().await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(manager.state(), ManagerState::Connected);
        assert_eq!(manager.attempts(), 0);
        assert_eq!(dialer.dials(), 4);

        manager.close().await;
    }

    #[tokio::test]
    async fn test_bounded_policy_gives_up() {
        let dialer = Arc::new(MockDialer::scripted(
            [Outcome::Accept],
            Outcome::Refuse(Some(503)),
        ));
        let manager = manager(params(5, 3), &dialer);
        let mut inbound = manager.listen().unwrap();
        let mut done = manager.done();
        manager.connect().await.unwrap();

        dialer.peer(0).fail("connection reset by peer");

        match settle(&mut done).await {
            Some(TransportError::ReconnectExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last.status(), Some(503));
            }
            other => panic!("unexpected termination: {:?}", other),
        }
        assert_eq!(manager.state(), ManagerState::Failed);
        assert!(next(&mut inbound).await.is_none());

        sleep(Duration::from_millis(50)).await;
        assert_eq!(dialer.dials(), 4);
        assert!(matches!(manager.connect().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_unbounded_policy_retries_until_close() {
        let dialer = Arc::new(MockDialer::scripted([Outcome::Accept], Outcome::Refuse(None)));
        let manager = manager(params(5, 0), &dialer);
        let mut done = manager.done();
        manager.connect().await.unwrap();

        dialer.peer(0).fail("connection reset by peer");
        eventually("several retries", || dialer.dials() > 5).await;
        assert!(!done.is_done());

        manager.close().await;
        assert!(settle(&mut done).await.is_none());
        assert_eq!(manager.state(), ManagerState::Closed);
    }

    #[tokio::test]
    async fn test_disabled_reconnect_fails_with_transport_error() {
        let dialer = Arc::new(MockDialer::accepting());
        let mut params = params(5, 3);
        params.auto_reconnect = false;
        let manager = manager(params, &dialer);
        let mut done = manager.done();
        manager.connect().await.unwrap();

        dialer.peer(0).fail("connection reset by peer");

        assert!(matches!(settle(&mut done).await, Some(TransportError::Read(_))));
        assert_eq!(manager.state(), ManagerState::Failed);
        assert_eq!(dialer.dials(), 1);
    }

    #[tokio::test]
    async fn test_initial_refusal_without_reconnect() {
        let dialer = Arc::new(MockDialer::scripted(
            [Outcome::Refuse(Some(503))],
            Outcome::Accept,
        ));
        let mut params = params(5, 3);
        params.auto_reconnect = false;
        let manager = manager(params, &dialer);
        let mut inbound = manager.listen().unwrap();
        let mut done = manager.done();

        let err = manager.connect().await.unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert_eq!(manager.state(), ManagerState::Failed);
        assert!(matches!(settle(&mut done).await, Some(TransportError::Handshake { .. })));
        assert!(next(&mut inbound).await.is_none());
    }

    #[tokio::test]
    async fn test_stream_survives_reconnect() {
        let dialer = Arc::new(MockDialer::accepting());
        let manager = manager(params(5, 3), &dialer);
        let mut inbound = manager.listen().unwrap();
        manager.connect().await.unwrap();

        dialer.peer(0).push("before");
        assert_eq!(next(&mut inbound).await.unwrap(), b"before");

        dialer.peer(0).push_close(1001, "going away");
        eventually("a second connection", || dialer.peers() == 2).await;
        dialer.peer(1).push("after");
        assert_eq!(next(&mut inbound).await.unwrap(), b"after");
        assert_eq!(manager.attempts(), 0);

        manager.close().await;
        assert!(next(&mut inbound).await.is_none());
    }

    #[tokio::test]
    async fn test_unrequested_clean_termination_reconnects() {
        let dialer = Arc::new(MockDialer::accepting());
        let manager = manager(params(5, 3), &dialer);
        manager.connect().await.unwrap();

        dialer.peer(0).end_locally();
        eventually("a second connection", || dialer.peers() == 2).await;

        manager.close().await;
    }

    struct Replay {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Resubscriber for Replay {
        async fn resubscribe(&self, transport: &Transport) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let deadline = Instant::now() + Duration::from_secs(1);
            transport
                .send(deadline, &json!({"event": "subscribe", "channel": "trades"}))
                .await
        }
    }

    #[tokio::test]
    async fn test_resubscribe_runs_after_reconnect() {
        let dialer = Arc::new(MockDialer::accepting());
        let replay = Arc::new(Replay {
            calls: AtomicUsize::new(0),
        });
        let manager = ConnectionManager::new(
            params(5, 3),
            dialer.clone(),
            Span::none(),
            Some(replay.clone()),
        );
        manager.connect().await.unwrap();
        assert_eq!(replay.calls.load(Ordering::SeqCst), 0);

        dialer.peer(0).fail("connection reset by peer");
        eventually("replayed subscription", || {
            dialer.peers() == 2 && !dialer.peer(1).writes().is_empty()
        })
        .await;

        assert_eq!(replay.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            dialer.peer(1).writes(),
            vec![r#"{"channel":"trades","event":"subscribe"}"#.to_string()]
        );
        manager.close().await;
    }

    #[tokio::test]
    async fn test_close_is_clean_and_final() {
        let dialer = Arc::new(MockDialer::accepting());
        let manager = manager(params(5, 3), &dialer);
        let mut done = manager.done();
        manager.connect().await.unwrap();

        manager
            .send(Instant::now() + Duration::from_secs(1), &json!({"event": "ping"}))
            .await
            .unwrap();
        assert_eq!(dialer.peer(0).writes().len(), 1);

        manager.close().await;
        manager.close().await;

        assert!(settle(&mut done).await.is_none());
        assert_eq!(manager.state(), ManagerState::Closed);
        assert_eq!(dialer.peer(0).closes(), 1);
        assert_eq!(dialer.dials(), 1);
        assert!(matches!(manager.connect().await, Err(TransportError::Closed)));
        assert!(matches!(
            manager.send(Instant::now() + Duration::from_secs(1), &json!({})).await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_close_interrupts_reconnect_wait() {
        let dialer = Arc::new(MockDialer::scripted([], Outcome::Refuse(Some(503))));
        let manager = Arc::new(manager(params(10_000, 3), &dialer));
        let mut done = manager.done();

        let connecting = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.connect().await })
        };
        eventually("the first dial", || dialer.dials() == 1).await;
        sleep(Duration::from_millis(10)).await;

        let started = Instant::now();
        manager.close().await;
        assert!(started.elapsed() < Duration::from_secs(1));

        assert!(matches!(connecting.await.unwrap(), Err(TransportError::Cancelled)));
        assert!(settle(&mut done).await.is_none());
        assert_eq!(manager.state(), ManagerState::Closed);
        assert_eq!(dialer.dials(), 1);
    }

    #[tokio::test]
    async fn test_configuration_error_is_not_retried() {
        let dialer = Arc::new(MockDialer::scripted([Outcome::Misconfigured], Outcome::Accept));
        let manager = manager(params(5, 3), &dialer);
        let mut done = manager.done();

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::Config(_)));
        assert_eq!(manager.state(), ManagerState::Failed);
        assert!(matches!(settle(&mut done).await, Some(TransportError::Config(_))));

        sleep(Duration::from_millis(30)).await;
        assert_eq!(dialer.dials(), 1);
        assert_eq!(manager.attempts(), 0);
    }

    #[tokio::test]
    async fn test_close_cancels_hanging_dial() {
        let dialer = Arc::new(MockDialer::accepting().with_delay(Duration::from_secs(10)));
        let manager = Arc::new(manager(params(5, 3), &dialer));
        let mut done = manager.done();

        let connecting = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.connect().await })
        };
        eventually("the dial to start", || dialer.dials() == 1).await;

        let started = Instant::now();
        manager.close().await;
        assert!(started.elapsed() < Duration::from_millis(500));

        let outcome = tokio::time::timeout(Duration::from_secs(1), connecting)
            .await
            .expect("connect still pending after close")
            .unwrap();
        assert!(matches!(outcome, Err(TransportError::Cancelled)));
        assert!(settle(&mut done).await.is_none());
        assert_eq!(manager.state(), ManagerState::Closed);
        assert_eq!(dialer.peers(), 0);
    }

    struct Hang {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Resubscriber for Hang {
        async fn resubscribe(&self, _transport: &Transport) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_close_aborts_stuck_supervisor_after_timeout() {
        let dialer = Arc::new(MockDialer::accepting());
        let hang = Arc::new(Hang {
            calls: AtomicUsize::new(0),
        });
        let mut params = params(5, 3);
        params.shutdown_timeout = Duration::from_millis(200);
        let manager = ConnectionManager::new(params, dialer.clone(), Span::none(), Some(hang.clone()));
        let mut done = manager.done();
        manager.connect().await.unwrap();

        dialer.peer(0).fail("connection reset by peer");
        eventually("the resubscribe to start", || hang.calls.load(Ordering::SeqCst) == 1).await;

        let started = Instant::now();
        manager.close().await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(200), "closed after {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(1), "closed after {:?}", elapsed);

        assert_eq!(manager.state(), ManagerState::Closed);
        assert!(settle(&mut done).await.is_none());
        eventually("the reconnected socket to close", || dialer.peer(1).closes() == 1).await;
    }
}
