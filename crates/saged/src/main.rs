//! Sage Daemon - answer orchestration daemon
//!
//! Streams answers over SSE, choosing a fast single pass or a bounded deep
//! reasoning loop per request.

use anyhow::Result;
use clap::Parser;
use saged::config::Config;
use saged::ollama::OllamaClient;
use saged::orchestrator::Orchestrator;
use saged::server::{self, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "saged", version, about = "Sage answer orchestration daemon")]
struct Cli {
    /// Config file (default: /etc/sage/config.toml, then /var/lib/sage/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overrides `server.bind`
    #[arg(long)]
    bind: Option<String>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("saged=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load(),
    };
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }

    if cli.print_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    info!("Sage Daemon v{} starting", env!("CARGO_PKG_VERSION"));

    if !OllamaClient::new(&config.llm)?.is_running().await {
        warn!("  LLM backend not reachable at {}", config.llm.base_url);
    }

    let config = Arc::new(config);
    let services = server::build_services(&config)?;
    let orchestrator = Orchestrator::new(services, config.clone());

    info!(
        "  Tool service at {} (registry ttl {}s)",
        config.tools.base_url, config.tools.registry_ttl_secs
    );
    info!("Sage Daemon ready");

    let bind = config.server.bind.clone();
    server::run(AppState::new(orchestrator, config), &bind).await
}
