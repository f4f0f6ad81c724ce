//! Health check endpoint

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::ApiState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Configured synthesis backend
    pub tts: &'static str,
    /// Whether turns stream audio fragments
    pub streaming: bool,
}

/// Liveness probe
async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    let ctx = &state.context;
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        tts: ctx.backend.name(),
        streaming: ctx.backend.streams(ctx.manager.stream),
    })
}

/// Build health router
pub fn router() -> Router<Arc<ApiState>> {
    Router::new().route("/health", get(health))
}
