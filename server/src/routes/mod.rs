//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds the board REST endpoints and the websocket endpoint
//! under a single Axum router. Browsers load the canvas from another origin,
//! so CORS is wide open.

pub mod boards;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/boards", post(boards::create_board))
        .route("/api/boards/{id}/snapshot", get(boards::get_snapshot))
        .route("/api/boards/{id}/events", get(boards::list_events))
        .route("/api/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
