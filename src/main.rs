//! Mock Interaction Server - CLI Entry Point

use anyhow::{Context, Result};
use clap::Parser;
use mock_interaction_server::{MockServer, MockServerConfig};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "mock-interaction-server",
    about = "Request-matching mock HTTP server for end-to-end tests",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "mock-server.yaml")]
    config: PathBuf,

    /// Port to listen on, overriding the configuration
    #[arg(short, long)]
    port: Option<u16>,

    /// Default host used in signatures, overriding the configuration
    #[arg(long)]
    host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        let default_config = include_str!("../config/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    let mut config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        MockServerConfig::from_file(&args.config)
            .with_context(|| format!("Failed to load {}", args.config.display()))?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration (no interactions)");
        MockServerConfig::default()
    };

    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host) = args.host {
        config.host = host;
    }

    if args.validate {
        config.validate()?;
        println!(
            "Configuration is valid ({} interactions defined)",
            config.interactions.len()
        );
        return Ok(());
    }

    let mut server = MockServer::new(config);
    let addr = server.start().await?;
    info!(url = %format!("http://{}", addr), "Serving interactions, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!(stats = ?server.stats(), "Shutting down");
    server.stop().await?;

    Ok(())
}
