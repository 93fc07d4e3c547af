use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::resolver::ServiceSummary;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub active_connections: u64,
    pub users: usize,
    pub web_services: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let directory = state.directory.load();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started.elapsed().as_secs(),
        active_connections: state.tracker.active_count(),
        users: directory.user_count(),
        web_services: directory.service_count(),
    })
}

pub async fn get_services(State(state): State<AdminState>) -> Json<Vec<ServiceSummary>> {
    Json(state.directory.load().summaries())
}
