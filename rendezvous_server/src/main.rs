//! Rendezvous server entry point
//!
//! Parses CLI arguments, sets up logging, and runs the accept loop until
//! Ctrl+C.

use std::net::{IpAddr, SocketAddr};

use anyhow::Context;
use clap::Parser;
use rendezvous_server::config::DEFAULT_PORT;
use rendezvous_server::{ServerConfig, ServerState, bind, serve};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// WebSocket rendezvous and relay server for peer-to-peer negotiation
#[derive(Debug, Parser)]
#[command(name = "rendezvous-server", version)]
struct Cli {
    /// IP address to bind to
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    host: String,

    /// TCP port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT, env = "PORT")]
    port: u16,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<ServerConfig> {
        let ip: IpAddr = self
            .host
            .parse()
            .with_context(|| format!("invalid bind address: '{}'", self.host))?;
        Ok(ServerConfig {
            bind_addr: SocketAddr::new(ip, self.port),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_config()?;
    let listener = bind(config.bind_addr).await?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    serve(listener, ServerState::new(), shutdown).await?;
    info!("rendezvous server stopped");
    Ok(())
}
