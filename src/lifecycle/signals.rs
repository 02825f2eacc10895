//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGINT, SIGTERM)
//! - Translate signals to shutdown causes
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Handlers are registered before the listener is bound
//! - SIGSTOP/SIGKILL cannot be caught; integrity failures are raised in
//!   software through [`ShutdownHandle::integrity_failure`]

use std::io;
use tokio::task::JoinHandle;

use crate::lifecycle::shutdown::{ShutdownCause, ShutdownHandle};

/// Forward interrupt/terminate signals to `handle` until the returned task
/// is aborted.
#[cfg(unix)]
pub fn forward_os_signals(handle: ShutdownHandle) -> io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        loop {
            let cause = tokio::select! {
                Some(()) = interrupt.recv() => ShutdownCause::Interrupt,
                Some(()) = terminate.recv() => ShutdownCause::Terminate,
                else => break,
            };
            tracing::info!(cause = %cause, "Shutdown signal received");
            handle.trigger(cause);
        }
    }))
}

/// Forward ctrl-c to `handle` until the returned task is aborted.
#[cfg(not(unix))]
pub fn forward_os_signals(handle: ShutdownHandle) -> io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!(cause = %ShutdownCause::Interrupt, "Shutdown signal received");
            handle.trigger(ShutdownCause::Interrupt);
        }
    }))
}
