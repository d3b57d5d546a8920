//! Route handlers

use axum::{extract::State, Extension, Json};
use dirgate_auth::Principal;
use serde::Serialize;

use crate::server::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthCheck {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

pub async fn index() -> &'static str {
    "Welcome to the home page!"
}

pub async fn home(Extension(principal): Extension<Principal>) -> String {
    format!("Welcome to your home page, {}!", principal.name())
}

/// Liveness only; the directory is not contacted
pub async fn health(State(state): State<AppState>) -> Json<HealthCheck> {
    Json(HealthCheck {
        status: "ok".to_string(),
        version: dirgate_core::VERSION.to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}
