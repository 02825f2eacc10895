//! The Service record and the shutdown orchestrator.
//!
//! # State machine
//! ```text
//! Starting → Running → Draining → Stopped
//!
//! Starting:  check collaborators and routes, install signal forwarding, bind,
//!            demultiplex, launch HTTP loop + RPC loop + pump
//! Running:   wait for the first loop exit OR the first shutdown cause
//! Draining:  close both sub-listeners and the raw listener, wait for the
//!            three loops to return
//! Stopped:   report the winning event
//! ```
//!
//! Exactly one event wins the race in `Running`; losing loop exits are
//! dropped with the channel.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

use crate::config::ServiceConfig;
use crate::error::{LoopKind, ServeError};
use crate::http::HttpServer;
use crate::lifecycle::shutdown::{Shutdown, ShutdownCause, ShutdownHandle};
use crate::lifecycle::signals::forward_os_signals;
use crate::net::demux::{demultiplex, Demux};
use crate::net::listener::{is_listener_closed, Listener, ListenerError};
use crate::observability::metrics::{self, MetricsError};
use crate::rpc::RpcServer;

/// Number of concurrently running loops per serve call.
const LOOP_COUNT: usize = 3;

/// Where a serve call currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeState {
    /// Not serving yet.
    Idle,
    Starting,
    /// All loops are up; `local_addr` is the bound address.
    Running { local_addr: SocketAddr },
    Draining,
    Stopped,
}

/// A long-lived service: a name, a bind address and a shutdown channel.
///
/// Network resources are scoped to a single [`serve`](Service::serve) call.
pub struct Service {
    config: ServiceConfig,
    shutdown: Shutdown,
    state: watch::Sender<ServeState>,
}

/// Terminal value of one loop.
struct LoopExit {
    kind: LoopKind,
    result: io::Result<()>,
}

/// Reports a loop's exit on the aggregation channel, including when the
/// loop panics.
struct ExitReporter {
    kind: LoopKind,
    exits: mpsc::Sender<LoopExit>,
    reported: bool,
}

impl ExitReporter {
    fn report(mut self, result: io::Result<()>) {
        let clean = match &result {
            Ok(()) => true,
            Err(e) => is_listener_closed(e),
        };
        metrics::record_loop_exit(self.kind.as_str(), clean);

        self.reported = true;
        // Only the first exit is read; the rest are dropped.
        let _ = self.exits.try_send(LoopExit {
            kind: self.kind,
            result,
        });
    }
}

impl Drop for ExitReporter {
    fn drop(&mut self) {
        if !self.reported {
            let _ = self.exits.try_send(LoopExit {
                kind: self.kind,
                result: Err(io::Error::other("loop panicked")),
            });
        }
    }
}

/// Aborts the signal forwarding task when dropped.
struct SignalForwarder(Option<JoinHandle<()>>);

impl Drop for SignalForwarder {
    fn drop(&mut self) {
        if let Some(task) = self.0.take() {
            task.abort();
        }
    }
}

enum Trigger {
    Loop(LoopExit),
    Signal(ShutdownCause),
}

impl Service {
    /// Create a service bound to `addr` with default settings.
    pub fn new(addr: impl Into<String>) -> Self {
        let mut config = ServiceConfig::default();
        config.listener.bind_address = addr.into();
        Self::from_config(config)
    }

    pub fn from_config(config: ServiceConfig) -> Self {
        let (state, _) = watch::channel(ServeState::Idle);
        Self {
            config,
            shutdown: Shutdown::new(),
            state,
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Handle for requesting shutdown of a running (or future) serve call.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.handle()
    }

    /// Observe serve state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ServeState> {
        self.state.subscribe()
    }

    /// Serve `/metrics` on `addr` (default `:9090`), labelled with this
    /// service's name.
    pub fn with_prometheus_exporter(&self, addr: Option<&str>) -> Result<(), MetricsError> {
        metrics::install_prometheus_exporter(&self.config.name, addr)
    }

    /// Serve HTTP and `rpc` on the configured address until a shutdown
    /// cause arrives or a loop fails.
    ///
    /// Returns `Ok(())` on graceful shutdown. Concurrent calls on the same
    /// service run one after the other.
    pub async fn serve<R: RpcServer>(&self, rpc: Option<R>) -> Result<(), ServeError> {
        let Some(rpc) = rpc else {
            return Err(ServeError::Config("an RPC server is required".to_string()));
        };

        let mut causes = self.shutdown.receiver().await;
        self.state.send_replace(ServeState::Starting);

        let result = self.run(rpc, &mut causes).await;

        // Causes that lost the race must not end the next serve call.
        while causes.try_recv().is_ok() {}
        self.state.send_replace(ServeState::Stopped);
        result
    }

    async fn run<R: RpcServer>(
        &self,
        rpc: R,
        causes: &mut mpsc::Receiver<ShutdownCause>,
    ) -> Result<(), ServeError> {
        let http_server =
            HttpServer::new(&self.config.http).map_err(|e| ServeError::Config(e.to_string()))?;

        let _signals = if self.config.lifecycle.handle_os_signals {
            SignalForwarder(Some(
                forward_os_signals(self.shutdown.handle()).map_err(ServeError::Signal)?,
            ))
        } else {
            SignalForwarder(None)
        };

        let listener = Listener::bind(&self.config.listener)
            .await
            .map_err(|e| match e {
                ListenerError::Bind { addr, source } => ServeError::Bind { addr, source },
                ListenerError::Accept(source) => ServeError::Bind {
                    addr: self.config.listener.bind_address.clone(),
                    source,
                },
            })?;

        let Demux {
            pump,
            http,
            rpc: rpc_listener,
            closer,
        } = demultiplex(listener, &self.config.demux).map_err(|source| ServeError::Bind {
            addr: self.config.listener.bind_address.clone(),
            source,
        })?;
        let local_addr = http.local_addr();

        let (exits_tx, mut exits) = mpsc::channel(LOOP_COUNT);
        let mut loops = JoinSet::new();
        spawn_loop(&mut loops, &exits_tx, LoopKind::Http, http_server.run(http));
        spawn_loop(&mut loops, &exits_tx, LoopKind::Rpc, rpc.serve(rpc_listener));
        spawn_loop(&mut loops, &exits_tx, LoopKind::Pump, pump.run());
        drop(exits_tx);

        self.state.send_replace(ServeState::Running { local_addr });
        tracing::info!(service = %self.config.name, address = %local_addr, "Service running");

        let trigger = tokio::select! {
            Some(exit) = exits.recv() => Trigger::Loop(exit),
            Some(cause) = causes.recv() => Trigger::Signal(cause),
        };

        self.state.send_replace(ServeState::Draining);
        closer.close();
        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Serve loop task failed");
            }
        }
        tracing::info!(service = %self.config.name, "Service stopped");

        match trigger {
            Trigger::Signal(cause) => {
                metrics::record_shutdown(cause.as_str());
                if cause.is_graceful() {
                    tracing::info!(cause = %cause, "Graceful shutdown");
                    Ok(())
                } else {
                    tracing::error!(cause = %cause, "Shutdown forced by integrity failure");
                    Err(ServeError::IntegrityFailure)
                }
            }
            Trigger::Loop(LoopExit { kind, result }) => match result {
                Ok(()) => {
                    tracing::info!(loop_kind = %kind, "Loop finished");
                    Ok(())
                }
                Err(e) if is_listener_closed(&e) => {
                    tracing::info!(loop_kind = %kind, "Loop finished on closed listener");
                    Ok(())
                }
                Err(source) => {
                    tracing::error!(loop_kind = %kind, error = %source, "Loop failed");
                    Err(ServeError::Loop { kind, source })
                }
            },
        }
    }
}

fn spawn_loop<F>(loops: &mut JoinSet<()>, exits: &mpsc::Sender<LoopExit>, kind: LoopKind, serve: F)
where
    F: Future<Output = io::Result<()>> + Send + 'static,
{
    let reporter = ExitReporter {
        kind,
        exits: exits.clone(),
        reported: false,
    };
    loops.spawn(async move {
        let result = serve.await;
        reporter.report(result);
    });
}
