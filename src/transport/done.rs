//! Terminal notification
//!
//! A `DoneSignal` is written at most once. `Done` handles observe it: they
//! resolve to `None` for a clean, intentional shutdown and to `Some(error)`
//! for an abnormal one. Dropping the signal without a value counts as clean.

use tokio::sync::watch;

use crate::types::TransportError;

/// Lifecycle outcome observed through `Done`
#[derive(Debug, Clone)]
pub enum Termination {
    Running,
    Clean,
    Failed(TransportError),
}

impl Termination {
    fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Producer side of the terminal notification
#[derive(Debug)]
pub(crate) struct DoneSignal {
    tx: watch::Sender<Termination>,
}

impl DoneSignal {
    pub(crate) fn new() -> (Self, Done) {
        let (tx, rx) = watch::channel(Termination::Running);
        (Self { tx }, Done { rx })
    }

    /// Record the outcome. Only the first call has any effect; returns
    /// whether this call was the one that recorded it.
    pub(crate) fn finish(&self, error: Option<TransportError>) -> bool {
        self.tx.send_if_modified(move |state| {
            if !state.is_running() {
                return false;
            }
            *state = match error {
                Some(err) => Termination::Failed(err),
                None => Termination::Clean,
            };
            true
        })
    }
}

/// Observer of a terminal notification
#[derive(Debug, Clone)]
pub struct Done {
    rx: watch::Receiver<Termination>,
}

impl Done {
    /// Wait for termination. `None` means a clean shutdown.
    pub async fn wait(&mut self) -> Option<TransportError> {
        match self.rx.wait_for(|state| !state.is_running()).await {
            Ok(state) => match &*state {
                Termination::Failed(err) => Some(err.clone()),
                _ => None,
            },
            // Producer dropped without recording anything
            Err(_) => None,
        }
    }

    /// Non-blocking check
    pub fn is_done(&self) -> bool {
        !self.rx.borrow().is_running() || self.rx.has_changed().is_err()
    }

    /// Current outcome
    pub fn termination(&self) -> Termination {
        let state = self.rx.borrow().clone();
        if state.is_running() && self.rx.has_changed().is_err() {
            return Termination::Clean;
        }
        state
    }
}
