//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Service (service.rs):
//!     bind → demultiplex → HTTP loop + RPC loop + pump → first event → drain
//!
//! Shutdown (shutdown.rs):
//!     ShutdownHandle::trigger → capacity-1 channel → serve call
//!
//! Signals (signals.rs):
//!     SIGINT → Interrupt, SIGTERM → Terminate
//! ```
//!
//! # Design Decisions
//! - One serve call at a time per service
//! - Only the first shutdown cause is kept; later ones are dropped
//! - The integrity failure cause ends serving with an error

pub mod service;
pub mod shutdown;
pub mod signals;

pub use service::{ServeState, Service};
pub use shutdown::{Shutdown, ShutdownCause, ShutdownHandle};
