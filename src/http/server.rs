//! HTTP service loop.
//!
//! # Responsibilities
//! - Create the Axum Router (readiness, version)
//! - Wire up middleware (request ID, tracing, handler timeout)
//! - Serve HTTP/1.1 connections handed over by the demultiplexer
//!
//! # Design Decisions
//! - Read timeout bounds how long a client may take to send its headers
//! - Write timeout bounds how long a handler may take to respond
//! - Each connection runs in its own task; closing the sub-listener stops
//!   accepting but leaves in-flight connections to finish

use axum::{routing::get, Json, Router};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioIo, TokioTimer};
use std::io;
use tower::ServiceExt;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::validation::check_route_path;
use crate::config::HttpConfig;
use crate::net::demux::SubListener;
use crate::net::listener::is_listener_closed;
use crate::version::{self, VersionInfo};

/// Body returned by the readiness endpoint.
pub const READY_BODY: &str = "ok";

/// A route path the router cannot be built with.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("invalid route path '{path}': {reason}")]
    Invalid { path: String, reason: &'static str },

    #[error("ready and version endpoints share the path '{0}'")]
    Duplicate(String),
}

/// HTTP server for the plain HTTP/1.1 side of the socket.
pub struct HttpServer {
    router: Router,
    config: HttpConfig,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: &HttpConfig) -> Result<Self, RouteError> {
        for path in [&config.ready_path, &config.version_path] {
            check_route_path(path).map_err(|reason| RouteError::Invalid {
                path: path.clone(),
                reason,
            })?;
        }
        if config.ready_path == config.version_path {
            return Err(RouteError::Duplicate(config.ready_path.clone()));
        }

        Ok(Self {
            router: Self::build_router(config),
            config: config.clone(),
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &HttpConfig) -> Router {
        Router::new()
            .route(&config.ready_path, get(ready_handler))
            .route(&config.version_path, get(version_handler))
            .layer(TimeoutLayer::new(config.write_timeout()))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The router served on every connection.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve connections from `listener` until it is closed.
    ///
    /// Returns the accept error; after a close this is the closed-listener
    /// condition.
    pub async fn run(self, mut listener: SubListener) -> io::Result<()> {
        tracing::info!(
            address = %listener.local_addr(),
            ready_path = %self.config.ready_path,
            "HTTP server starting"
        );

        let mut builder = http1::Builder::new();
        builder
            .timer(TokioTimer::new())
            .header_read_timeout(self.config.read_timeout());

        loop {
            let stream = match listener.accept().await {
                Ok(stream) => stream,
                Err(e) => {
                    if is_listener_closed(&e) {
                        tracing::info!("HTTP server stopped");
                    }
                    return Err(e);
                }
            };

            let id = stream.id();
            let router = self.router.clone();
            let builder = builder.clone();

            tokio::spawn(async move {
                let service = service_fn(move |request: Request<Incoming>| router.clone().oneshot(request));
                if let Err(e) = builder.serve_connection(TokioIo::new(stream), service).await {
                    tracing::debug!(connection_id = %id, error = %e, "HTTP connection ended with error");
                }
            });
        }
    }
}

async fn ready_handler() -> &'static str {
    READY_BODY
}

async fn version_handler() -> Json<VersionInfo> {
    Json(version::get())
}
