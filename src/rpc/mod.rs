//! RPC side of the socket.
//!
//! # Data Flow
//! ```text
//! RPC sub-listener (connections already classified as gRPC)
//!     → RpcServer::serve (any implementation supplied by the caller)
//!     → Http2Server: hyper HTTP/2 connection → Axum router
//!         (panic recovery, gRPC-aware tracing)
//! ```

pub mod server;

pub use server::{unimplemented_router, Http2Server, RpcServer};
