//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServiceConfig (validated, immutable)
//!     → owned by the Service, read by every serve loop
//! ```
//!
//! # Design Decisions
//! - Config is immutable once a Service is built
//! - All fields have defaults except the bind address
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::DemuxConfig;
pub use schema::HttpConfig;
pub use schema::ListenerConfig;
pub use schema::LogFormat;
pub use schema::ObservabilityConfig;
pub use schema::RpcConfig;
pub use schema::ServiceConfig;
pub use validation::{validate_config, ValidationError};
