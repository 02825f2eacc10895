//! Error taxonomy for [`Service::serve`](crate::Service::serve).

use std::io;
use thiserror::Error;

/// Which concurrent loop produced a terminal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopKind {
    /// HTTP service loop.
    Http,
    /// RPC service loop.
    Rpc,
    /// Demultiplexer accept loop on the raw listener.
    Pump,
}

impl LoopKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopKind::Http => "http",
            LoopKind::Rpc => "rpc",
            LoopKind::Pump => "demux",
        }
    }
}

impl std::fmt::Display for LoopKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a serve call.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The raw listener could not be acquired. No loop was started.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// A required collaborator is missing. No network resource was opened.
    #[error("configuration error: {0}")]
    Config(String),

    /// OS signal handlers could not be installed.
    #[error("failed to install signal handler: {0}")]
    Signal(#[source] io::Error),

    /// A loop stopped for a reason other than its listener being closed.
    #[error("server error: {kind} loop failed: {source}")]
    Loop {
        kind: LoopKind,
        #[source]
        source: io::Error,
    },

    /// Shutdown was forced by an integrity failure.
    #[error("integrity issue caused shutdown")]
    IntegrityFailure,
}

impl ServeError {
    /// The loop that failed, for [`ServeError::Loop`].
    pub fn loop_kind(&self) -> Option<LoopKind> {
        match self {
            ServeError::Loop { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
