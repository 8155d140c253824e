//! Shutdown coordination for the long-running loops.

use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

/// Coordinator for shutdown.
///
/// Every loop holds a [`StopSignal`] obtained from [`Shutdown::subscribe`].
/// Triggering drops the only sender, which disconnects every receiver at once.
pub struct Shutdown {
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(0);
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> StopSignal {
        StopSignal(self.rx.clone())
    }

    /// Trigger the shutdown signal. Further calls do nothing.
    pub fn trigger(&self) {
        let sender = match self.tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if sender.is_some() {
            log::debug!("Shutdown triggered");
        }
    }

    /// Returns true once the signal has been triggered.
    pub fn is_triggered(&self) -> bool {
        self.subscribe().is_stopped()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable handle that fires when its [`Shutdown`] is triggered.
#[derive(Clone, Debug)]
pub struct StopSignal(Receiver<()>);

impl StopSignal {
    /// Returns true once the signal fired.
    pub fn is_stopped(&self) -> bool {
        matches!(self.0.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Blocks until the signal fires.
    pub fn wait(&self) {
        while self.0.recv().is_ok() {}
    }

    /// Blocks until the signal fires or the timeout elapses. Returns true if stopped.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(
            self.0.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    /// Underlying receiver, ready once stopped. For use in `select!`.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.0
    }
}
