//! Protocol demultiplexer: one socket, two listeners.
//!
//! # Responsibilities
//! - Accept from the raw listener (the pump)
//! - Read ahead on each connection until the matcher can decide
//! - Queue the connection on the RPC or HTTP sub-listener, or drop it
//!
//! # Design Decisions
//! - Every accepted connection is classified in its own task, so a slow
//!   client never stalls the accept loop
//! - Each sub-listener has its own bounded queue; a full queue only blocks
//!   the connections waiting for that sub-listener
//! - Closing is the only cancellation: closing a sub-listener wakes its
//!   accept call, closing the raw listener stops the pump and drops every
//!   connection still being classified

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

use crate::config::DemuxConfig;
use crate::net::connection::ConnectionId;
use crate::net::listener::{
    is_transient_accept_error, listener_closed, ConnectionPermit, Listener, ListenerError,
};
use crate::net::matcher::{classify, classify_truncated, Classification, Protocol};
use crate::net::stream::{MuxedStream, Rewind};
use crate::observability::metrics;

const READ_CHUNK: usize = 4096;

/// Idempotent close flag shared between a listener and whoever may close it.
#[derive(Debug, Clone)]
pub struct CloseSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CloseSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Close; returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        self.tx.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// A listener-like source yielding only connections of one protocol.
#[derive(Debug)]
pub struct SubListener {
    protocol: Protocol,
    rx: mpsc::Receiver<MuxedStream>,
    closed: CloseSignal,
    local_addr: SocketAddr,
}

impl SubListener {
    /// Wait for the next connection routed here.
    ///
    /// Once the sub-listener is closed this returns the closed-listener
    /// condition (see [`is_listener_closed`](crate::net::listener::is_listener_closed)),
    /// even if connections are still queued.
    pub async fn accept(&mut self) -> io::Result<MuxedStream> {
        if self.closed.is_closed() {
            return Err(listener_closed());
        }

        tokio::select! {
            biased;
            _ = self.closed.closed() => Err(listener_closed()),
            conn = self.rx.recv() => conn.ok_or_else(listener_closed),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Address of the shared socket.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Closes the raw listener and both sub-listeners.
#[derive(Debug, Clone)]
pub struct DemuxCloser {
    raw: CloseSignal,
    http: CloseSignal,
    rpc: CloseSignal,
}

impl DemuxCloser {
    /// Close everything. Safe to call any number of times, from any task.
    pub fn close(&self) {
        self.http.close();
        self.rpc.close();
        self.raw.close();
    }

    pub fn is_closed(&self) -> bool {
        self.raw.is_closed() && self.http.is_closed() && self.rpc.is_closed()
    }
}

#[derive(Debug)]
struct Route {
    tx: mpsc::Sender<MuxedStream>,
    closed: CloseSignal,
}

#[derive(Debug)]
struct Routes {
    http: Route,
    rpc: Route,
}

impl Routes {
    fn get(&self, protocol: Protocol) -> &Route {
        match protocol {
            Protocol::Http => &self.http,
            Protocol::Rpc => &self.rpc,
        }
    }
}

/// The accept loop over the raw listener.
pub struct Pump {
    listener: Listener,
    config: DemuxConfig,
    closed: CloseSignal,
    routes: Arc<Routes>,
}

/// A demultiplexed listener, ready to run.
pub struct Demux {
    pub pump: Pump,
    pub http: SubListener,
    pub rpc: SubListener,
    pub closer: DemuxCloser,
}

/// Split one bound listener into an HTTP and an RPC sub-listener.
pub fn demultiplex(listener: Listener, config: &DemuxConfig) -> io::Result<Demux> {
    let local_addr = listener.local_addr()?;
    let capacity = config.queue_capacity.max(1);

    let (http_tx, http_rx) = mpsc::channel(capacity);
    let (rpc_tx, rpc_rx) = mpsc::channel(capacity);
    let closer = DemuxCloser {
        raw: CloseSignal::new(),
        http: CloseSignal::new(),
        rpc: CloseSignal::new(),
    };

    let routes = Routes {
        http: Route {
            tx: http_tx,
            closed: closer.http.clone(),
        },
        rpc: Route {
            tx: rpc_tx,
            closed: closer.rpc.clone(),
        },
    };

    Ok(Demux {
        pump: Pump {
            listener,
            config: config.clone(),
            closed: closer.raw.clone(),
            routes: Arc::new(routes),
        },
        http: SubListener {
            protocol: Protocol::Http,
            rx: http_rx,
            closed: closer.http.clone(),
            local_addr,
        },
        rpc: SubListener {
            protocol: Protocol::Rpc,
            rx: rpc_rx,
            closed: closer.rpc.clone(),
            local_addr,
        },
        closer,
    })
}

impl Pump {
    /// Accept until the raw listener is closed or fails.
    ///
    /// Always ends with an error: the closed-listener condition after a
    /// close, the accept error otherwise. The socket is released before
    /// this returns.
    pub async fn run(self) -> io::Result<()> {
        let Pump {
            listener,
            config,
            closed,
            routes,
        } = self;

        tracing::debug!(address = ?listener.local_addr().ok(), "Demultiplexer accepting");

        loop {
            let accepted = tokio::select! {
                biased;
                _ = closed.closed() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr, permit)) => {
                    let routes = Arc::clone(&routes);
                    let config = config.clone();
                    let closed = closed.clone();
                    tokio::spawn(async move {
                        route_connection(stream, peer_addr, permit, &routes, &config, &closed).await;
                    });
                }
                Err(ListenerError::Accept(e)) if is_transient_accept_error(&e) => {
                    tracing::debug!(error = %e, "Transient accept error");
                }
                Err(ListenerError::Accept(e)) | Err(ListenerError::Bind { source: e, .. }) => {
                    tracing::error!(error = %e, "Accept failed");
                    return Err(e);
                }
            }
        }

        drop(listener);
        tracing::debug!("Demultiplexer stopped accepting");
        Err(listener_closed())
    }
}

async fn route_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    permit: ConnectionPermit,
    routes: &Routes,
    config: &DemuxConfig,
    shutdown: &CloseSignal,
) {
    let id = ConnectionId::new();

    let classified = tokio::select! {
        _ = shutdown.closed() => return,
        res = tokio::time::timeout(
            config.match_timeout(),
            read_prefix(&mut stream, config.max_peek_bytes),
        ) => res,
    };

    let (protocol, prefix) = match classified {
        Ok(Ok((Classification::Matched(protocol), prefix))) => (protocol, prefix),
        Ok(Ok((_, prefix))) => {
            tracing::debug!(
                connection_id = %id,
                peer_addr = %peer_addr,
                bytes = prefix.len(),
                "Dropping connection matching no protocol"
            );
            metrics::record_connection("unmatched");
            return;
        }
        Ok(Err(e)) => {
            tracing::debug!(connection_id = %id, peer_addr = %peer_addr, error = %e, "Connection failed during classification");
            return;
        }
        Err(_) => {
            tracing::debug!(connection_id = %id, peer_addr = %peer_addr, "Connection did not reveal its protocol in time");
            metrics::record_connection("unmatched");
            return;
        }
    };

    tracing::debug!(connection_id = %id, peer_addr = %peer_addr, protocol = %protocol, "Connection classified");
    metrics::record_connection(protocol.as_str());

    let route = routes.get(protocol);
    let conn = MuxedStream::new(Rewind::new(prefix, stream), id, peer_addr, protocol, permit);

    tokio::select! {
        _ = route.closed.closed() => {
            tracing::debug!(connection_id = %id, protocol = %protocol, "Sub-listener closed, dropping connection");
        }
        _ = shutdown.closed() => {}
        sent = route.tx.send(conn) => {
            if sent.is_err() {
                tracing::debug!(connection_id = %id, protocol = %protocol, "Sub-listener gone, dropping connection");
            }
        }
    }
}

/// Read until the matcher decides, the peer stops sending, or `limit` bytes
/// have been buffered without a decision.
pub(crate) async fn read_prefix<R>(stream: &mut R, limit: usize) -> io::Result<(Classification, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(READ_CHUNK.min(limit));
    let mut chunk = [0u8; READ_CHUNK];

    while buf.len() < limit {
        let want = (limit - buf.len()).min(READ_CHUNK);
        let n = stream.read(&mut chunk[..want]).await?;
        if n == 0 {
            return Ok((classify_truncated(&buf), buf));
        }
        buf.extend_from_slice(&chunk[..n]);

        match classify(&buf) {
            Classification::NeedMore => continue,
            decided => return Ok((decided, buf)),
        }
    }

    Ok((Classification::Unmatched, buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListenerConfig;
    use crate::net::listener::is_listener_closed;
    use crate::net::matcher::tests::grpc_prefix;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    struct Running {
        addr: SocketAddr,
        http: SubListener,
        rpc: SubListener,
        closer: DemuxCloser,
        pump: JoinHandle<io::Result<()>>,
    }

    async fn start(config: DemuxConfig) -> Running {
        let listener = Listener::bind(&ListenerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            max_connections: 64,
        })
        .await
        .unwrap();
        let addr = listener.local_addr().unwrap();
        let demux = demultiplex(listener, &config).unwrap();

        Running {
            addr,
            http: demux.http,
            rpc: demux.rpc,
            closer: demux.closer,
            pump: tokio::spawn(demux.pump.run()),
        }
    }

    async fn send(addr: SocketAddr, bytes: &[u8]) -> TcpStream {
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(bytes).await.unwrap();
        client
    }

    const WAIT: Duration = Duration::from_secs(5);
    const SHORT: Duration = Duration::from_millis(200);

    #[tokio::test]
    async fn grpc_connection_reaches_rpc_listener_intact() {
        let mut mux = start(DemuxConfig::default()).await;
        let sent = grpc_prefix("application/grpc");
        let _client = send(mux.addr, &sent).await;

        let mut conn = timeout(WAIT, mux.rpc.accept()).await.unwrap().unwrap();
        assert_eq!(conn.protocol(), Protocol::Rpc);

        let mut replayed = vec![0u8; sent.len()];
        conn.read_exact(&mut replayed).await.unwrap();
        assert_eq!(replayed, sent);

        assert!(timeout(SHORT, mux.http.accept()).await.is_err());
    }

    #[tokio::test]
    async fn http_connection_reaches_http_listener() {
        let mut mux = start(DemuxConfig::default()).await;
        let _client = send(mux.addr, b"GET /_ready HTTP/1.1\r\nHost: x\r\n\r\n").await;

        let mut conn = timeout(WAIT, mux.http.accept()).await.unwrap().unwrap();
        assert_eq!(conn.protocol(), Protocol::Http);

        let mut line = [0u8; 20];
        conn.read_exact(&mut line).await.unwrap();
        assert_eq!(&line, b"GET /_ready HTTP/1.1");

        assert!(timeout(SHORT, mux.rpc.accept()).await.is_err());
    }

    #[tokio::test]
    async fn unmatched_connection_is_closed_and_not_delivered() {
        let mut mux = start(DemuxConfig::default()).await;
        let mut client = send(mux.addr, b"\x00\x01garbage\r\n").await;

        let mut buf = [0u8; 8];
        let read = timeout(WAIT, client.read(&mut buf)).await.unwrap();
        assert!(matches!(read, Ok(0) | Err(_)), "server should close: {:?}", read);

        assert!(timeout(SHORT, mux.http.accept()).await.is_err());
        assert!(timeout(SHORT, mux.rpc.accept()).await.is_err());
        assert!(!mux.pump.is_finished());
    }

    #[tokio::test]
    async fn silent_connection_times_out() {
        let mut mux = start(DemuxConfig {
            match_timeout_ms: 50,
            ..DemuxConfig::default()
        })
        .await;
        let mut client = TcpStream::connect(mux.addr).await.unwrap();

        let mut buf = [0u8; 1];
        let read = timeout(WAIT, client.read(&mut buf)).await.unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));
        assert!(timeout(SHORT, mux.http.accept()).await.is_err());
    }

    #[tokio::test]
    async fn full_http_queue_does_not_stall_rpc() {
        let mut mux = start(DemuxConfig {
            queue_capacity: 1,
            ..DemuxConfig::default()
        })
        .await;

        // Nobody accepts HTTP: one connection fills the queue, the rest wait.
        let mut backlog = Vec::new();
        for _ in 0..3 {
            backlog.push(send(mux.addr, b"GET / HTTP/1.1\r\n\r\n").await);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let _client = send(mux.addr, &grpc_prefix("application/grpc")).await;
        let conn = timeout(WAIT, mux.rpc.accept()).await.unwrap().unwrap();
        assert_eq!(conn.protocol(), Protocol::Rpc);

        // The waiting HTTP connections are still delivered in turn.
        for _ in 0..3 {
            timeout(WAIT, mux.http.accept()).await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn close_unblocks_everything_and_releases_socket() {
        let mut mux = start(DemuxConfig::default()).await;

        let closer = mux.closer.clone();
        let waiting = tokio::spawn(async move { mux.http.accept().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        closer.close();
        closer.close();
        assert!(closer.is_closed());

        let err = timeout(WAIT, waiting).await.unwrap().unwrap().unwrap_err();
        assert!(is_listener_closed(&err));

        let err = mux.rpc.accept().await.unwrap_err();
        assert!(is_listener_closed(&err));

        let pumped = timeout(WAIT, mux.pump).await.unwrap().unwrap();
        assert!(is_listener_closed(&pumped.unwrap_err()));

        assert!(TcpStream::connect(mux.addr).await.is_err());
    }

    #[test]
    fn close_signal_reports_first_close_only() {
        let signal = CloseSignal::new();
        assert!(!signal.is_closed());
        assert!(signal.close());
        assert!(!signal.close());
        assert!(signal.is_closed());
    }

    #[tokio::test]
    async fn read_prefix_stops_at_limit() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&[b'A'; 200]).await.unwrap();

        let (class, buf) = read_prefix(&mut server, 64).await.unwrap();
        assert_eq!(class, Classification::Unmatched);
        assert_eq!(buf.len(), 64);
    }

    #[tokio::test]
    async fn read_prefix_decides_on_eof() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(b"POST /upload").await.unwrap();
        drop(client);

        let (class, buf) = read_prefix(&mut server, 1024).await.unwrap();
        assert_eq!(class, Classification::Matched(Protocol::Http));
        assert_eq!(buf, b"POST /upload");
    }
}
