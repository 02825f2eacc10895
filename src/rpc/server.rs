//! RPC server contract and the default HTTP/2 implementation.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http2;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use std::future::Future;
use std::io;
use std::time::Duration;
use tower::ServiceExt;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::config::RpcConfig;
use crate::net::demux::SubListener;
use crate::net::listener::is_listener_closed;

/// A ready-to-run RPC server.
///
/// `serve` owns the RPC sub-listener and should return once
/// [`SubListener::accept`] reports the closed-listener condition, returning
/// that error (or `Ok(())`). Any other error is treated as a failure of the
/// RPC loop.
pub trait RpcServer: Send + 'static {
    fn serve(self, listener: SubListener) -> impl Future<Output = io::Result<()>> + Send;
}

/// Serves an Axum router (for instance a tonic router converted with
/// `into_axum_router`) over HTTP/2 with panic recovery and tracing attached.
pub struct Http2Server {
    router: Router,
    config: RpcConfig,
}

impl Http2Server {
    pub fn new(router: Router) -> Self {
        Self::with_config(router, RpcConfig::default())
    }

    pub fn with_config(router: Router, config: RpcConfig) -> Self {
        let router = router
            .layer(CatchPanicLayer::new())
            .layer(TraceLayer::new_for_grpc());
        Self { router, config }
    }

    fn builder(&self) -> http2::Builder<TokioExecutor> {
        let mut builder = http2::Builder::new(TokioExecutor::new());
        builder.timer(TokioTimer::new());
        if let Some(streams) = self.config.max_concurrent_streams {
            builder.max_concurrent_streams(streams);
        }
        if let Some(secs) = self.config.keepalive_interval_secs {
            builder.keep_alive_interval(Duration::from_secs(secs));
        }
        builder
    }
}

impl RpcServer for Http2Server {
    fn serve(self, mut listener: SubListener) -> impl Future<Output = io::Result<()>> + Send {
        async move {
            tracing::info!(address = %listener.local_addr(), "RPC server starting");
            let builder = self.builder();

            loop {
                let stream = match listener.accept().await {
                    Ok(stream) => stream,
                    Err(e) => {
                        if is_listener_closed(&e) {
                            tracing::info!("RPC server stopped");
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
                        tracing::debug!(connection_id = %id, error = %e, "RPC connection ended with error");
                    }
                });
            }
        }
    }
}

/// gRPC status code `UNIMPLEMENTED`.
const GRPC_UNIMPLEMENTED: &str = "12";

/// A router answering every call with gRPC status `UNIMPLEMENTED`.
pub fn unimplemented_router() -> Router {
    Router::new().fallback(unimplemented_handler)
}

async fn unimplemented_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [
            ("content-type", "application/grpc"),
            ("grpc-status", GRPC_UNIMPLEMENTED),
            ("grpc-message", "method not implemented"),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[tokio::test]
    async fn unimplemented_router_reports_grpc_status() {
        let response = unimplemented_router()
            .oneshot(
                axum::http::Request::post("/helloworld.Greeter/SayHello")
                    .header("content-type", "application/grpc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["grpc-status"], GRPC_UNIMPLEMENTED);
        assert_eq!(response.headers()["content-type"], "application/grpc");
    }
}
