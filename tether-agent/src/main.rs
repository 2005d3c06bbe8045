//! tether-agent entry point.
//!
//! ```text
//! tether-agent                        Run with tether-agent.toml (or defaults)
//! tether-agent --config <path>        Load a custom config TOML
//! tether-agent --host <h> --port <p>  Override the controller endpoint
//! tether-agent --gen-config           Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tether_agent::config::AgentConfig;
use tether_agent::service::AgentService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tether-agent", about = "tether remote device agent")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "tether-agent.toml")]
    config: PathBuf,

    /// Controller host (overrides the config file).
    #[arg(long)]
    host: Option<String>,

    /// Controller port (overrides the config file).
    #[arg(long)]
    port: Option<u16>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        println!("{}", AgentConfig::default_toml()?);
        return Ok(());
    }

    let mut config = AgentConfig::load(&cli.config);
    if let Some(host) = cli.host {
        config.controller.host = host;
    }
    if let Some(port) = cli.port {
        config.controller.port = port;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("tether-agent v{}", env!("CARGO_PKG_VERSION"));
    info!("controller: {}", config.connection_info());
    info!(
        "encryption: {}",
        if config.security.key.trim().is_empty() { "off" } else { "on" }
    );

    let service = AgentService::new(config);
    let stop = service.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.cancel();
    });

    service.run().await?;

    Ok(())
}
