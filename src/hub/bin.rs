//! CodeRelay Daemon Binary
//!
//! A WebSocket server that coordinates real-time collaborative code
//! analysis: per-file subscriptions, debounced live edits, cached results.
//!
//! # Usage
//!
//! ```bash
//! coderelay-daemon --port 9848
//! coderelay-daemon --port 9848 --host 127.0.0.1 --debounce-ms 300
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use coderelay::collaborator::NullCollaborator;
use coderelay::config::HubConfig;
use coderelay::hub::{handle_connection, Hub};

/// CodeRelay coordination hub daemon
#[derive(Parser, Debug)]
#[command(name = "coderelay-daemon")]
#[command(about = "CodeRelay collaborative analysis hub")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "9848", env = "CODERELAY_PORT")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1", env = "CODERELAY_HOST")]
    host: String,

    /// Default debounce window for incremental updates, in milliseconds
    #[arg(long, default_value = "300")]
    debounce_ms: u64,

    /// Cache entry time-to-live, in seconds
    #[arg(long, default_value = "300")]
    cache_ttl_secs: u64,

    /// Maximum number of cached results
    #[arg(long, default_value = "1000")]
    cache_max_entries: usize,

    /// Close connections with no activity for this many seconds
    #[arg(long, default_value = "90")]
    liveness_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("coderelay=info".parse()?)
                .add_directive("coderelay_daemon=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;

    let config = HubConfig {
        default_debounce: Duration::from_millis(args.debounce_ms),
        cache_ttl: Duration::from_secs(args.cache_ttl_secs),
        cache_max_entries: args.cache_max_entries,
        liveness_timeout: Duration::from_secs(args.liveness_timeout_secs),
        ..HubConfig::default()
    };

    // The daemon runs without an attached analyzer; clients still get
    // subscriptions, debouncing, rooms, and caching, with empty results.
    let hub = Hub::spawn(config, Arc::new(NullCollaborator));

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("CodeRelay daemon listening on ws://{}", addr);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received ctrl-c, shutting down");
                hub.shutdown().await?;
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    tracing::info!("Accepted connection from {}", addr);
                    let hub = hub.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, hub).await;
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    Ok(())
}
