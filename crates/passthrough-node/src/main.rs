//! Passthrough Node
//!
//! Runs one service source and answers every call with the payload it
//! carried. The response travels the full path: listener, source registry,
//! response dispatcher.

use anyhow::{Context, Result};
use clap::Parser;
use service_source::{ChannelListener, ServiceSource, SourceConfig, SourceRegistry};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Passthrough Node: echoes every inbound event back to its caller
#[derive(Parser, Debug)]
#[command(name = "passthrough-node")]
#[command(about = "Serve the built-in event service and echo each payload back")]
struct Args {
    /// Endpoint URL, grpc://<host>:<port>[/EventService/process]
    #[arg(short, long, default_value = "grpc://0.0.0.0:8888")]
    url: String,

    /// Source identifier used to route responses
    #[arg(short, long, default_value = "passthrough")]
    source_id: String,

    /// Response timeout in milliseconds
    #[arg(long, default_value = "10000")]
    service_timeout: u64,

    /// Shutdown grace period in seconds
    #[arg(long, default_value = "5")]
    shutdown_waiting_time: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = SourceConfig::new(args.url, args.source_id.clone());
    config.service_timeout_ms = args.service_timeout;
    config.server_shutdown_waiting_time = args.shutdown_waiting_time;

    let registry = Arc::new(SourceRegistry::new());
    let (listener, mut events) = ChannelListener::new();
    let source = ServiceSource::builder(config)
        .listener(Arc::new(listener))
        .registry(Arc::clone(&registry))
        .build()
        .context("invalid source configuration")?;

    let addr = source.start().await.context("failed to start source")?;
    info!(%addr, source_id = %args.source_id, "Passthrough node is running. Press Ctrl+C to stop.");

    // Echo stage
    let source_id = args.source_id;
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Some(correlation_id) = event.transport_properties.first() else {
                warn!("Event without correlation id");
                continue;
            };
            registry.dispatch(&source_id, correlation_id, event.payload);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    match source.shutdown().await {
        Ok(outcome) => {
            info!(?outcome, "Passthrough node stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Shutdown failed");
            Err(e.into())
        }
    }
}
