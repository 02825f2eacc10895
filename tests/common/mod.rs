//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use foundation::net::listener::listener_closed;
use foundation::{RpcServer, ServeError, ServeState, Service, ServiceConfig, SubListener};
use tokio::task::JoinHandle;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Config bound to an ephemeral loopback port, without OS signal handling.
pub fn local_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.name = "foundation-test".to_string();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.lifecycle.handle_os_signals = false;
    config
}

/// An address nothing is listening on (at the time of the call).
pub fn unused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// Run `service.serve(rpc)` in the background and wait until it is running.
pub async fn start<R: RpcServer>(
    service: Arc<Service>,
    rpc: R,
) -> (SocketAddr, JoinHandle<Result<(), ServeError>>) {
    let mut state = service.watch_state();
    let task = tokio::spawn({
        let service = service.clone();
        async move { service.serve(Some(rpc)).await }
    });

    let running = tokio::time::timeout(
        WAIT,
        state.wait_for(|s| matches!(s, ServeState::Running { .. })),
    )
    .await
    .expect("service did not start")
    .expect("state channel closed");

    let ServeState::Running { local_addr } = *running else {
        unreachable!()
    };
    (local_addr, task)
}

/// Wait for a background serve call to return.
pub async fn finish(task: JoinHandle<Result<(), ServeError>>) -> Result<(), ServeError> {
    tokio::time::timeout(WAIT, task)
        .await
        .expect("serve did not return")
        .expect("serve task panicked")
}

/// Accepts RPC connections and drops them; returns the accept error.
pub struct DropConnections;

impl RpcServer for DropConnections {
    async fn serve(self, mut listener: SubListener) -> io::Result<()> {
        loop {
            drop(listener.accept().await?);
        }
    }
}

/// Fails as soon as it starts.
pub struct Failing;

impl RpcServer for Failing {
    async fn serve(self, _listener: SubListener) -> io::Result<()> {
        Err(io::Error::other("rpc backend unavailable"))
    }
}

/// Returns `Ok(())` as soon as it starts.
pub struct Finishing;

impl RpcServer for Finishing {
    async fn serve(self, _listener: SubListener) -> io::Result<()> {
        Ok(())
    }
}

/// Reports its listener as closed as soon as it starts.
pub struct ClosedOnStart;

impl RpcServer for ClosedOnStart {
    async fn serve(self, _listener: SubListener) -> io::Result<()> {
        Err(listener_closed())
    }
}
