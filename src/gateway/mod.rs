//! Client-facing side of the gateway.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (ID, tracking for graceful shutdown)
//!     → session.rs (keep-alive loop)
//!         → head.rs (request head, body framing)
//!         → resolver → processor
//! ```
//!
//! # Design Decisions
//! - The inbound side is a plain HTTP/1.x parser over TCP: the processor
//!   needs the raw byte stream to decide when the response head goes out
//! - Bounded accept via semaphore prevents resource exhaustion
//! - On shutdown: stop accepting, close idle connections, let in-flight
//!   exchanges finish within the grace period

pub mod connection;
pub mod head;
pub mod listener;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::config::GatewayConfig;
use crate::lifecycle::Shutdown;
use crate::processor::outbound::build_client;
use crate::processor::{HttpSchemeProcessor, ProcessorSettings, TelemetrySink};
use crate::resolver::ServiceDirectory;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{Listener, ListenerError};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("cannot build destination client: {0}")]
    Client(#[from] reqwest::Error),

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_head_bytes: usize,
    pub idle_timeout: Duration,
}

/// Everything a connection needs, shared by all of them.
pub struct GatewayState {
    pub processor: HttpSchemeProcessor,
    pub directory: Arc<ArcSwap<ServiceDirectory>>,
    pub settings: SessionSettings,
}

pub struct Gateway {
    state: Arc<GatewayState>,
    tracker: ConnectionTracker,
    shutdown_grace: Duration,
}

impl Gateway {
    pub fn new(
        config: &GatewayConfig,
        directory: Arc<ArcSwap<ServiceDirectory>>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Result<Self, GatewayError> {
        let client = build_client(config)?;
        let processor = HttpSchemeProcessor::new(client, ProcessorSettings::from_config(config), sink);
        Ok(Self {
            state: Arc::new(GatewayState {
                processor,
                directory,
                settings: SessionSettings {
                    max_head_bytes: config.body.max_head_bytes,
                    idle_timeout: Duration::from_secs(config.timeouts.idle_secs),
                },
            }),
            tracker: ConnectionTracker::new(),
            shutdown_grace: Duration::from_secs(config.timeouts.shutdown_grace_secs),
        })
    }

    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Accept until shutdown, then drain.
    pub async fn run(&self, listener: Listener, shutdown: &Shutdown) -> Result<(), GatewayError> {
        let mut stop = shutdown.subscribe();
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(address = %addr, "Gateway accepting connections");
        }

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = stop.recv() => break,
            };
            let (stream, peer, permit) = match accepted {
                Ok(accepted) => accepted,
                Err(ListenerError::Accept(e)) => {
                    // Usually fd exhaustion; back off instead of spinning.
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let guard = self.tracker.track();
            let state = Arc::clone(&self.state);
            let connection_shutdown = shutdown.subscribe();
            tokio::spawn(async move {
                let id = guard.id();
                tracing::debug!(connection_id = %id, %peer, "Connection opened");
                session::serve_connection(stream, peer, id, state, connection_shutdown).await;
                drop(permit);
                drop(guard);
            });
        }

        let open = self.tracker.active_count();
        tracing::info!(open_connections = open, grace = ?self.shutdown_grace, "Draining connections");
        if self.tracker.wait_for_drain(self.shutdown_grace).await {
            tracing::info!("All connections drained");
        } else {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "Grace period elapsed with connections still open"
            );
        }
        Ok(())
    }
}
