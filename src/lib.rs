//! Single-port HTTP/1.1 and gRPC serving with a shutdown orchestrator.
//!
//! A [`Service`] binds one TCP address, splits incoming connections into an
//! HTTP/1.1 stream and a gRPC-over-HTTP/2 stream, serves both, and stops on
//! the first loop exit or shutdown cause.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod rpc;
pub mod version;

pub use config::schema::ServiceConfig;
pub use error::{LoopKind, ServeError};
pub use http::HttpServer;
pub use lifecycle::{ServeState, Service, ShutdownCause, ShutdownHandle};
pub use net::SubListener;
pub use rpc::{Http2Server, RpcServer};
