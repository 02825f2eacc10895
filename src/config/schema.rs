//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for a service.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for a service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Display name, also used to label exported metrics.
    pub name: String,

    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// HTTP service loop settings.
    pub http: HttpConfig,

    /// Settings for the default HTTP/2 RPC server.
    pub rpc: RpcConfig,

    /// Protocol demultiplexer settings.
    pub demux: DemuxConfig,

    /// Startup/shutdown behavior.
    pub lifecycle: LifecycleConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "foundation".to_string(),
            listener: ListenerConfig::default(),
            http: HttpConfig::default(),
            rpc: RpcConfig::default(),
            demux: DemuxConfig::default(),
            lifecycle: LifecycleConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080" or ":8080"). Has no default.
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: String::new(),
            max_connections: 10_000,
        }
    }
}

/// HTTP service loop configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Time allowed for a client to send request headers, in seconds.
    pub read_timeout_secs: u64,

    /// Time allowed for a handler to produce its response, in seconds.
    pub write_timeout_secs: u64,

    /// Readiness endpoint path.
    pub ready_path: String,

    /// Version endpoint path.
    pub version_path: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: 15,
            write_timeout_secs: 15,
            ready_path: "/_ready".to_string(),
            version_path: "/_version".to_string(),
        }
    }
}

impl HttpConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

/// HTTP/2 settings for the default RPC server.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Maximum concurrent streams per connection (HTTP/2 default when unset).
    pub max_concurrent_streams: Option<u32>,

    /// Interval between HTTP/2 keepalive pings, in seconds.
    pub keepalive_interval_secs: Option<u64>,
}

/// Protocol demultiplexer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DemuxConfig {
    /// Capacity of each sub-listener queue.
    pub queue_capacity: usize,

    /// Time allowed for a connection to reveal its protocol, in milliseconds.
    ///
    /// The server writes nothing while matching, so an HTTP/2 client that
    /// waits for the server SETTINGS before sending HEADERS is dropped once
    /// this expires.
    pub match_timeout_ms: u64,

    /// Maximum bytes read ahead while classifying a connection.
    pub max_peek_bytes: usize,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 128,
            match_timeout_ms: 10_000,
            max_peek_bytes: 64 * 1024,
        }
    }
}

impl DemuxConfig {
    pub fn match_timeout(&self) -> Duration {
        Duration::from_millis(self.match_timeout_ms)
    }
}

/// Lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Forward SIGINT/SIGTERM to the shutdown channel while serving.
    pub handle_os_signals: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            handle_os_signals: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: ":9090".to_string(),
        }
    }
}
