//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::ServiceConfig;
use crate::net::matcher::MIN_PEEK_BYTES;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.name.trim().is_empty() {
        errors.push(ValidationError::new("name", "must not be empty"));
    }

    if config.listener.bind_address.is_empty() {
        errors.push(ValidationError::new("listener.bind_address", "must be set"));
    } else if let Err(msg) = check_host_port(&config.listener.bind_address) {
        errors.push(ValidationError::new("listener.bind_address", msg));
    }

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }

    if config.http.read_timeout_secs == 0 {
        errors.push(ValidationError::new("http.read_timeout_secs", "must be greater than 0"));
    }
    if config.http.write_timeout_secs == 0 {
        errors.push(ValidationError::new("http.write_timeout_secs", "must be greater than 0"));
    }
    if let Err(msg) = check_route_path(&config.http.ready_path) {
        errors.push(ValidationError::new("http.ready_path", msg));
    }
    if let Err(msg) = check_route_path(&config.http.version_path) {
        errors.push(ValidationError::new("http.version_path", msg));
    } else if config.http.version_path == config.http.ready_path {
        errors.push(ValidationError::new("http.version_path", "must differ from http.ready_path"));
    }

    if config.demux.queue_capacity == 0 {
        errors.push(ValidationError::new("demux.queue_capacity", "must be greater than 0"));
    }
    if config.demux.match_timeout_ms == 0 {
        errors.push(ValidationError::new("demux.match_timeout_ms", "must be greater than 0"));
    }
    if config.demux.max_peek_bytes < MIN_PEEK_BYTES {
        errors.push(ValidationError::new(
            "demux.max_peek_bytes",
            format!("must be at least {}", MIN_PEEK_BYTES),
        ));
    }

    if config.observability.metrics_enabled {
        if let Err(msg) = check_host_port(&config.observability.metrics_address) {
            errors.push(ValidationError::new("observability.metrics_address", msg));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// A path usable as a literal axum route.
pub(crate) fn check_route_path(path: &str) -> Result<(), &'static str> {
    if !path.starts_with('/') {
        return Err("must start with '/'");
    }
    if path.contains(['{', '}', '*']) {
        return Err("must not contain route captures or wildcards");
    }
    Ok(())
}

fn check_host_port(addr: &str) -> Result<(), String> {
    let (_, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| format!("'{}' is not of the form host:port", addr))?;
    port.parse::<u16>()
        .map(|_| ())
        .map_err(|_| format!("'{}' has an invalid port", addr))
}
