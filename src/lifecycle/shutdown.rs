//! Shutdown causes and the channel that carries them.
//!
//! A [`Shutdown`] owns a single-slot channel. Anything holding a
//! [`ShutdownHandle`] (the OS signal forwarder, a health check, a test)
//! can push a cause without blocking; the orchestrator reads at most one
//! cause per serve call.

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, MutexGuard};

/// Why a shutdown was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownCause {
    /// SIGINT / ctrl-c.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// Requested programmatically.
    Requested,
    /// Something detected corrupted state; always surfaced as a failure.
    IntegrityFailure,
}

impl ShutdownCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownCause::Interrupt => "interrupt",
            ShutdownCause::Terminate => "terminate",
            ShutdownCause::Requested => "requested",
            ShutdownCause::IntegrityFailure => "integrity_failure",
        }
    }

    /// Whether this cause ends a serve call without an error.
    pub fn is_graceful(&self) -> bool {
        !matches!(self, ShutdownCause::IntegrityFailure)
    }
}

impl std::fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner of the shutdown channel.
#[derive(Debug)]
pub struct Shutdown {
    tx: mpsc::Sender<ShutdownCause>,
    rx: Mutex<mpsc::Receiver<ShutdownCause>>,
}

impl Shutdown {
    /// Create a new shutdown channel with room for one pending cause.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// A cloneable handle for requesting shutdown.
    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.tx.clone(),
        }
    }

    /// Exclusive access to the receiving side for the duration of a serve call.
    pub(crate) async fn receiver(&self) -> MutexGuard<'_, mpsc::Receiver<ShutdownCause>> {
        self.rx.lock().await
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Requests shutdown of a running service.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: mpsc::Sender<ShutdownCause>,
}

impl ShutdownHandle {
    /// Push a cause. Never blocks.
    ///
    /// Returns `false` when a cause is already pending; the pending one wins.
    pub fn trigger(&self, cause: ShutdownCause) -> bool {
        match self.tx.try_send(cause) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::debug!(cause = %cause, "Shutdown already pending, ignoring cause");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Request a graceful shutdown.
    pub fn shutdown(&self) -> bool {
        self.trigger(ShutdownCause::Requested)
    }

    /// Stop the service and make it report an integrity failure.
    pub fn integrity_failure(&self) -> bool {
        self.trigger(ShutdownCause::IntegrityFailure)
    }
}
