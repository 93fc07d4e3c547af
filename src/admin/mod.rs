//! Read-only admin API.
//!
//! # Responsibilities
//! - `/admin/status`: version, uptime, connection and directory counts
//! - `/admin/services`: the configured web services of the live directory
//!
//! # Design Decisions
//! - Separate listener from client traffic, bound to localhost by default
//! - Every route sits behind the bearer-token middleware

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::gateway::ConnectionTracker;
use crate::lifecycle::Shutdown;
use crate::resolver::ServiceDirectory;

use self::auth::admin_auth_middleware;
use self::handlers::{get_services, get_status};

#[derive(Clone)]
pub struct AdminState {
    pub directory: Arc<ArcSwap<ServiceDirectory>>,
    pub tracker: ConnectionTracker,
    pub api_key: Arc<str>,
    pub started: Instant,
}

#[allow(deprecated)]
pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/services", get(get_services))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_secs(10))),
        )
        .with_state(state)
}

pub async fn serve_admin(listener: TcpListener, state: AdminState, shutdown: Shutdown) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(address = %addr, "Admin API listening");
    }
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
}
