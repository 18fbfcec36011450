use std::path::PathBuf;

use anyhow::Context;
use chorus_server::ServerConfig;
use clap::Parser;

/// Realtime message relay with optional JWT-gated rooms.
#[derive(Debug, Parser)]
#[command(name = "chorus", version)]
struct Cli {
    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Base URL of the auth service publishing the JWKS document.
    /// When unset the relay runs open, fanning out to every connection.
    #[arg(long, env = "CHORUS_AUTH_URL")]
    auth_url: Option<String>,

    /// Directory of static files served alongside the relay.
    #[arg(long, env = "CHORUS_PUBLIC_DIR", default_value = "public")]
    public_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match &cli.auth_url {
        Some(url) => tracing::info!(auth_url = %url, "token verification enabled"),
        None => tracing::warn!("no auth URL configured, relaying between all connections"),
    }

    let config = ServerConfig {
        host: cli.host,
        port: cli.port,
        auth_base_url: cli.auth_url,
        public_dir: cli.public_dir,
        ..Default::default()
    };

    let handle = chorus_server::start(config)
        .await
        .context("failed to start relay server")?;

    tracing::info!(port = handle.port, "chorus ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    Ok(())
}
