//! HTTP API handlers and routing.

pub mod error;
mod v1;

use axum::{routing::get, Json, Router};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the main API router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", v1::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
