//! foundation service binary.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────┐
//!                        │                  SERVICE                     │
//!                        │                                              │
//!     TCP connection     │  ┌──────────┐   ┌─────────┐   ┌───────────┐  │
//!     ───────────────────┼─▶│ listener │──▶│  demux  │──▶│ RPC loop  │  │
//!                        │  └──────────┘   │ (pump)  │   │ (HTTP/2)  │  │
//!                        │                 │         │   └───────────┘  │
//!                        │                 │         │   ┌───────────┐  │
//!                        │                 │         │──▶│ HTTP loop │  │
//!                        │                 └─────────┘   │ (HTTP/1)  │  │
//!                        │                               └───────────┘  │
//!                        │  ┌────────────────────────────────────────┐  │
//!     SIGINT / SIGTERM   │  │ lifecycle: first loop exit or shutdown │  │
//!     ───────────────────┼─▶│ cause wins, then drain all three loops │  │
//!                        │  └────────────────────────────────────────┘  │
//!                        └──────────────────────────────────────────────┘
//! ```
//!
//! Without a configuration file the service listens on `:8080` and answers
//! every gRPC call with `UNIMPLEMENTED`.

use std::fs;
use std::path::PathBuf;

use clap::Parser;

use foundation::config::{parse_config, validate_config, ConfigError, ServiceConfig};
use foundation::observability::logging::init_logging;
use foundation::rpc::{unimplemented_router, Http2Server};
use foundation::{version, Service};

const DEFAULT_BIND_ADDRESS: &str = ":8080";

#[derive(Parser)]
#[command(name = "foundation")]
#[command(about = "Serve HTTP/1.1 and gRPC on a single port", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overrides the configuration file
    #[arg(short, long)]
    bind: Option<String>,

    /// Service name, overrides the configuration file
    #[arg(short, long)]
    name: Option<String>,
}

fn load(cli: &Cli) -> Result<ServiceConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => parse_config(&fs::read_to_string(path).map_err(ConfigError::Io)?)?,
        None => ServiceConfig::default(),
    };

    if let Some(bind) = &cli.bind {
        config.listener.bind_address = bind.clone();
    }
    if config.listener.bind_address.is_empty() {
        config.listener.bind_address = DEFAULT_BIND_ADDRESS.to_string();
    }
    if let Some(name) = &cli.name {
        config.name = name.clone();
    }

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load(&cli)?;

    init_logging(&config.observability)?;

    tracing::info!(
        service = %config.name,
        version = %version::get(),
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        "Configuration loaded"
    );

    let rpc = Http2Server::with_config(unimplemented_router(), config.rpc.clone());
    let metrics_address = config
        .observability
        .metrics_enabled
        .then(|| config.observability.metrics_address.clone());
    let service = Service::from_config(config);

    if let Some(addr) = metrics_address {
        if let Err(e) = service.with_prometheus_exporter(Some(&addr)) {
            tracing::error!(error = %e, metrics_address = %addr, "Failed to start metrics exporter");
        }
    }

    if let Err(e) = service.serve(Some(rpc)).await {
        tracing::error!(error = %e, "Service exited with error");
        return Err(e.into());
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
