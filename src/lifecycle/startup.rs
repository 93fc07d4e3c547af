//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize metrics and compile the service directory
//! - Start background tasks (config reloader, admin API)
//! - Bind the listener and run the gateway until shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - The listener binds last (traffic only when ready)

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;

use crate::admin::{serve_admin, AdminState};
use crate::condition::ConditionSettings;
use crate::config::watcher::{run_reloader, ConfigWatcher};
use crate::config::GatewayConfig;
use crate::gateway::{Gateway, GatewayError, Listener};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::pipeline::Registry;
use crate::processor::TracingSink;
use crate::resolver::{DirectoryError, ServiceDirectory};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("cannot start config watcher: {0}")]
    Watcher(#[from] notify::Error),

    #[error("cannot bind admin API on {address}: {source}")]
    Admin {
        address: String,
        source: std::io::Error,
    },
}

/// Compile the initial directory from `config`.
pub fn build_directory(config: &GatewayConfig) -> Result<ServiceDirectory, DirectoryError> {
    let registry = Registry::with_builtins(ConditionSettings::from(&config.conditions));
    ServiceDirectory::build(config, &registry)
}

/// Run the gateway until `shutdown` fires. `config_path` enables hot reload.
pub async fn run(
    config: GatewayConfig,
    config_path: Option<PathBuf>,
    shutdown: Shutdown,
) -> Result<(), StartupError> {
    let started = Instant::now();

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let directory = build_directory(&config)?;
    tracing::info!(
        users = directory.user_count(),
        web_services = directory.service_count(),
        "Service directory compiled"
    );
    let directory = Arc::new(ArcSwap::from_pointee(directory));

    // Held until the gateway stops; dropping it stops watching.
    let _watcher = match config_path {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(&path);
            let handle = watcher.run()?;
            tokio::spawn(run_reloader(updates, Arc::clone(&directory), shutdown.subscribe()));
            Some(handle)
        }
        None => None,
    };

    let gateway = Gateway::new(&config, Arc::clone(&directory), Arc::new(TracingSink))?;

    if config.admin.enabled {
        let listener = tokio::net::TcpListener::bind(&config.admin.bind_address)
            .await
            .map_err(|source| StartupError::Admin {
                address: config.admin.bind_address.clone(),
                source,
            })?;
        let state = AdminState {
            directory: Arc::clone(&directory),
            tracker: gateway.tracker(),
            api_key: Arc::from(config.admin.api_key.as_str()),
            started,
        };
        let admin_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_admin(listener, state, admin_shutdown).await {
                tracing::error!(error = %e, "Admin API stopped");
            }
        });
    }

    let listener = Listener::bind(&config.listener).await.map_err(GatewayError::from)?;
    tracing::info!(startup_ms = started.elapsed().as_millis() as u64, "Gateway ready");
    gateway.run(listener, &shutdown).await?;
    Ok(())
}
