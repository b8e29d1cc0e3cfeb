//! gRPC-Web bridge (v1)
//!
//! Fronts a native gRPC server so browsers can reach it.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────┐
//!                        │                 GRPC-WEB BRIDGE              │
//!                        │                                              │
//!   Browser (gRPC-Web)   │  ┌────────┐   ┌──────────┐   ┌────────────┐  │
//!   ─────────────────────┼─▶│  http  │──▶│  bridge  │──▶│  upstream  │──┼──▶ gRPC server
//!   Browser (WebSocket)  │  │ server │   │ classify │   │  (h2c)     │  │     (HTTP/2)
//!   ─────────────────────┼─▶│        │   │ dispatch │   │            │  │
//!   Plain HTTP           │  └────────┘   └──────────┘   └────────────┘  │
//!   ─────────────────────┼─▶      (plain requests skip the bridge)      │
//!                        │                                              │
//!                        │  config · observability · lifecycle          │
//!                        └──────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use grpc_web_bridge::config::{self, BridgeConfig};
use grpc_web_bridge::observability::{logging, metrics};
use grpc_web_bridge::{HttpServer, Shutdown};

#[derive(Parser)]
#[command(name = "grpc-web-bridge")]
#[command(about = "Bridge gRPC-Web and grpc-websockets clients to a gRPC server", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listener.bind_address.
    #[arg(short, long)]
    bind: Option<String>,

    /// Override upstream.address.
    #[arg(short, long)]
    upstream: Option<String>,

    /// Override bridge.websocket_ping_ms.
    #[arg(long)]
    websocket_ping_ms: Option<u64>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

impl Cli {
    fn load(&self) -> Result<BridgeConfig, config::ConfigError> {
        let mut config = match &self.config {
            Some(path) => config::load_config(path)?,
            None => BridgeConfig::default(),
        };

        if let Some(bind) = &self.bind {
            config.listener.bind_address = bind.clone();
        }
        if let Some(upstream) = &self.upstream {
            config.upstream.address = upstream.clone();
        }
        if let Some(ping) = self.websocket_ping_ms {
            config.bridge.websocket_ping_ms = ping;
        }

        config::validate_config(&config).map_err(config::ConfigError::Validation)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = cli.load()?;

    if cli.check {
        println!("configuration OK");
        return Ok(());
    }

    logging::init(&config.observability);
    tracing::info!("grpc-web-bridge v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.address,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr);
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let shutdown = Shutdown::new();
    shutdown.trigger_on_signal();

    let server = HttpServer::new(config)?;
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
