//! Health check endpoints
//!
//! - /health - liveness, always 200 while the process runs
//! - /ready  - readiness, 200 only while the store connection is up

use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::db::ConnectionState;
use crate::routes::response::{json_response, BoxBody};
use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Uptime in seconds
    pub uptime: u64,
    pub database: &'static str,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub database: &'static str,
}

/// GET /health
pub fn health_check(state: &AppState) -> Response<BoxBody> {
    let body = HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        database: state.connection.state().as_str(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    json_response(StatusCode::OK, &body)
}

/// GET /ready
pub fn readiness_check(state: &AppState) -> Response<BoxBody> {
    let db_state = state.connection.state();
    let ready = db_state == ConnectionState::Connected;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    json_response(
        status,
        &ReadinessResponse {
            ready,
            database: db_state.as_str(),
        },
    )
}
