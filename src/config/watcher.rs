//! Configuration file watcher for hot reload.
//!
//! The notify callback runs on the watcher's own thread; it only loads and
//! validates. Compiling and swapping the service directory happens on the
//! runtime, in [`run_reloader`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};

use crate::condition::ConditionSettings;
use crate::config::loader::load_config;
use crate::config::schema::GatewayConfig;
use crate::pipeline::Registry;
use crate::resolver::ServiceDirectory;

/// Monitors the configuration file and sends every valid new version.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<GatewayConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GatewayConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. Dropping the returned watcher stops it.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx;
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    tracing::info!(path = %path.display(), "Config file change detected, reloading");
                    match load_config(&path) {
                        Ok(config) => {
                            let _ = tx.send(config);
                        }
                        Err(e) => tracing::error!(
                            error = %e,
                            "Failed to reload config, keeping current configuration"
                        ),
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;
        tracing::info!(path = %self.path.display(), "Config watcher started");
        Ok(watcher)
    }
}

/// Compile `config` and publish it. Returns whether the swap happened.
pub fn apply_update(directory: &ArcSwap<ServiceDirectory>, config: &GatewayConfig) -> bool {
    let registry = Registry::with_builtins(ConditionSettings::from(&config.conditions));
    match ServiceDirectory::build(config, &registry) {
        Ok(next) => {
            tracing::info!(
                users = next.user_count(),
                web_services = next.service_count(),
                "Service directory reloaded"
            );
            directory.store(Arc::new(next));
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Reloaded config rejected");
            false
        }
    }
}

/// Apply updates until the channel closes or shutdown is signalled.
pub async fn run_reloader(
    mut updates: mpsc::UnboundedReceiver<GatewayConfig>,
    directory: Arc<ArcSwap<ServiceDirectory>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(config) => {
                    apply_update(&directory, &config);
                }
                None => break,
            },
            _ = shutdown.recv() => break,
        }
    }
    tracing::debug!("Config reloader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[tokio::test]
    async fn reloader_swaps_directory() {
        let directory = Arc::new(ArcSwap::from_pointee(ServiceDirectory::default()));
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(run_reloader(rx, directory.clone(), shutdown_rx));

        let config = parse_config(
            r#"
[[users]]
id = "alice"

[[web_services]]
id = "api"
user = "alice"
destination = "https://api.example.com"
"#,
        )
        .unwrap();
        tx.send(config).unwrap();

        for _ in 0..50 {
            if directory.load().service_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(directory.load().service_count(), 1);
        assert_eq!(directory.load().user_count(), 1);

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
