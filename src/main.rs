//! PassePlat gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────────┐
//!                    │                        GATEWAY                            │
//!   Client request   │  ┌─────────┐   ┌──────────┐   ┌───────────────────────┐  │
//!   ─────────────────┼─▶│ gateway │──▶│ resolver │──▶│       processor       │──┼──▶ Destination
//!                    │  │ session │   │ PP_* /   │   │ phases: preparation,  │  │    web service
//!                    │  └─────────┘   │ subdomain│   │ started_receiving,    │  │
//!                    │       ▲        └──────────┘   │ emitted, reach_failure│  │
//!   Client response  │       │                       └──────────┬────────────┘  │
//!   ◀────────────────┼───────┴──────────── emission ◀───────────┘               │
//!                    │                                                          │
//!                    │  ┌────────────────────────────────────────────────────┐  │
//!                    │  │ config + watcher │ admin API │ observability │ lifecycle│
//!                    │  └────────────────────────────────────────────────────┘  │
//!                    └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use passeplat_gateway::config::{load_config, GatewayConfig};
use passeplat_gateway::lifecycle::{signals, startup, Shutdown};
use passeplat_gateway::observability::logging;

#[derive(Parser)]
#[command(name = "passeplat-gateway", version, about = "Intercepting HTTP gateway")]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,

    /// Do not reload the configuration file when it changes.
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => GatewayConfig::default(),
    };

    if cli.check {
        match startup::build_directory(&config) {
            Ok(directory) => {
                println!(
                    "configuration OK: {} users, {} web services",
                    directory.user_count(),
                    directory.service_count()
                );
                return ExitCode::SUCCESS;
            }
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::FAILURE;
            }
        }
    }

    if let Err(e) = logging::init_logging(&config.observability) {
        eprintln!("{e}");
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "passeplat-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        request_timeout_secs = config.timeouts.request_secs,
        users = config.users.len(),
        web_services = config.web_services.len(),
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    let watch_path = if cli.no_watch { None } else { cli.config.clone() };
    match startup::run(config, watch_path, shutdown).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Gateway failed");
            ExitCode::FAILURE
        }
    }
}
