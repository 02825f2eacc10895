//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP sub-listener (connections already classified as HTTP/1.x)
//!     → server.rs (hyper HTTP/1 connection, read timeout)
//!     → Axum router (request ID, trace, write timeout)
//!     → readiness / version handlers
//! ```

pub mod server;

pub use server::{HttpServer, RouteError, READY_BODY};
