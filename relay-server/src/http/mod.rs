//! HTTP surface: the signaling websocket and a health probe.

mod websocket;

use axum::{extract::State, routing::get, Json, Router};
use relay_sfu::Sfu;
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub use websocket::websocket_handler;

#[derive(Clone)]
pub struct AppState {
    pub sfu: Arc<Sfu>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    peers: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        peers: state.sfu.peer_count(),
    })
}

pub fn create_router(sfu: Arc<Sfu>) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/healthz", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { sfu })
}
