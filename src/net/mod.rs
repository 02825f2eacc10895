//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, connection limits)
//!     → demux.rs (pump; one classification task per connection)
//!     → matcher.rs (gRPC over HTTP/2, then HTTP/1.x)
//!     → stream.rs (replay of the bytes read while classifying)
//!     → RPC or HTTP sub-listener
//! ```
//!
//! # Design Decisions
//! - Classification never blocks the accept loop
//! - Each sub-listener has its own bounded queue
//! - Unmatched connections are closed

pub mod connection;
pub mod demux;
pub mod listener;
pub mod matcher;
pub mod stream;

pub use demux::{demultiplex, CloseSignal, Demux, DemuxCloser, Pump, SubListener};
pub use listener::{is_listener_closed, Listener};
pub use matcher::Protocol;
pub use stream::MuxedStream;
